// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use ::prost::Message;
use bytes::{Bytes, BytesMut};
use hashing::{Digest, Function};

///
/// Extension methods on `prost::Message` for messages that live in the blob store: Directory
/// and Tree objects, action results, and the other protocol structures whose serialized form
/// is what actually gets content addressed and stored.
///
pub trait MessageExt: Message
where
    Self: Sized,
{
    /// The serialized form of this message, as it would be stored.
    fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf)
            .expect("illegal state: encoded_len returned wrong length");
        buf.freeze()
    }

    ///
    /// The digest under which this message's serialized form is (or would be) stored as a
    /// blob. This is how nested structures are located: a Directory inside a Tree has no
    /// digest of its own on the wire, only the one recomputable from its contents.
    ///
    fn to_digest(&self, function: &Function) -> Digest {
        let mut generator = function.new_generator();
        generator.update(&self.to_bytes());
        generator.finish()
    }
}

impl<M: ::prost::Message> MessageExt for M {}

#[cfg(test)]
mod tests {
    use hashing::{DigestFunction, Function, InstanceName};

    use super::MessageExt;

    #[test]
    fn to_digest_matches_hashing_the_serialized_form() {
        let function = Function::new(InstanceName::empty(), DigestFunction::Sha256);
        let message = prost_types::Duration {
            seconds: 42,
            nanos: 7,
        };
        let mut generator = function.new_generator();
        generator.update(&message.to_bytes());
        assert_eq!(message.to_digest(&function), generator.finish());
    }

    #[test]
    fn empty_messages_have_the_empty_digest() {
        let function = Function::new(InstanceName::empty(), DigestFunction::Sha256);
        let message = prost_types::Duration::default();
        assert_eq!(message.to_digest(&function), function.empty_digest());
    }
}
