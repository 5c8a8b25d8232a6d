// Copyright 2024 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
// Enable all clippy lints except for many of the pedantic ones. It's a shame this needs to be copied and pasted across crates, but there doesn't appear to be a way to include inner attributes from a common source.
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
// It is often more clear to show that nothing is being moved.
#![allow(clippy::match_ref_pats)]
// Subjective style.
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
// Default isn't as big a deal as people seem to think it is.
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
// Arc<Mutex> can be more clear than needing to grok Orderings:
#![allow(clippy::mutex_atomic)]

use std::cmp::Ordering;
use std::fmt;
use std::io::{self, Write};
use std::str::FromStr;

use digest::Digest as _;
use md5::Md5;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use tonic::Status;
use uuid::Uuid;

mod instance_name;
pub use crate::instance_name::InstanceName;

mod set;
pub use crate::set::{DigestSet, DigestSetBuilder};

mod trie;
pub use crate::trie::InstanceNameTrie;

#[cfg(test)]
mod fingerprint_tests;
#[cfg(test)]
mod instance_name_tests;
#[cfg(test)]
mod set_tests;
#[cfg(test)]
mod trie_tests;

/// The length of the longest supported hash (SHA-512), in bytes.
pub const MAX_HASH_LENGTH: usize = 64;

///
/// The raw output of a digest function, stored inline so that Fingerprints remain `Copy` even
/// though the supported digest functions emit hashes of different lengths.
///
#[derive(Clone, Copy)]
pub struct Fingerprint {
    bytes: [u8; MAX_HASH_LENGTH],
    length: u8,
}

impl Fingerprint {
    pub fn from_bytes(bytes: &[u8]) -> Result<Fingerprint, String> {
        if bytes.len() > MAX_HASH_LENGTH {
            return Err(format!(
                "Input value was not a fingerprint; had length: {}",
                bytes.len()
            ));
        }
        let mut fingerprint = [0; MAX_HASH_LENGTH];
        fingerprint[..bytes.len()].clone_from_slice(bytes);
        Ok(Fingerprint {
            bytes: fingerprint,
            length: bytes.len() as u8,
        })
    }

    /// Parses a lowercase hexadecimal representation. Uppercase characters are rejected, so that
    /// a blob only ever has one name.
    pub fn from_hex_string(hex_string: &str) -> Result<Fingerprint, String> {
        if hex_string
            .bytes()
            .any(|b| !matches!(b, b'0'..=b'9' | b'a'..=b'f'))
        {
            return Err(format!(
                "Fingerprint {hex_string:?} contains characters outside of lowercase hexadecimal"
            ));
        }
        let bytes = hex::decode(hex_string).map_err(|e| format!("{e:?}"))?;
        Fingerprint::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.length as usize]
    }

    pub fn len(&self) -> usize {
        self.length as usize
    }

    #[allow(clippy::wrong_self_convention)]
    pub fn to_hex(&self) -> String {
        let mut s = String::new();
        for &byte in self.as_bytes() {
            fmt::Write::write_fmt(&mut s, format_args!("{byte:02x}")).unwrap();
        }
        s
    }
}

impl PartialEq for Fingerprint {
    fn eq(&self, other: &Fingerprint) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Fingerprint {}

impl std::hash::Hash for Fingerprint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state)
    }
}

impl PartialOrd for Fingerprint {
    fn partial_cmp(&self, other: &Fingerprint) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fingerprint {
    fn cmp(&self, other: &Fingerprint) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint<{}>", self.to_hex())
    }
}

impl AsRef<[u8]> for Fingerprint {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl FromStr for Fingerprint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fingerprint::from_hex_string(s)
    }
}

///
/// A hashing algorithm supported by the storage layer. The discriminants correspond to the wire
/// enumeration of the remote execution protocol.
///
/// Functions with a wire value of 7 or below can be recognized from the length of their hashes,
/// which is how resource names that predate explicit digest function components are parsed.
///
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum DigestFunction {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
    Blake3,
}

impl DigestFunction {
    /// The length of this function's hashes, in bytes.
    pub fn hash_length(self) -> usize {
        match self {
            DigestFunction::Md5 => 16,
            DigestFunction::Sha1 => 20,
            DigestFunction::Sha256 => 32,
            DigestFunction::Sha384 => 48,
            DigestFunction::Sha512 => 64,
            DigestFunction::Blake3 => 32,
        }
    }

    /// Infers the digest function from the length of a hash in bytes. Only functions with a wire
    /// value of 7 or below may be inferred, so BLAKE3 (which shares SHA-256's length) never is.
    pub fn from_hash_length(length: usize) -> Option<DigestFunction> {
        match length {
            16 => Some(DigestFunction::Md5),
            20 => Some(DigestFunction::Sha1),
            32 => Some(DigestFunction::Sha256),
            48 => Some(DigestFunction::Sha384),
            64 => Some(DigestFunction::Sha512),
            _ => None,
        }
    }

    /// The name used in byte stream resource names.
    pub fn name(self) -> &'static str {
        match self {
            DigestFunction::Md5 => "md5",
            DigestFunction::Sha1 => "sha1",
            DigestFunction::Sha256 => "sha256",
            DigestFunction::Sha384 => "sha384",
            DigestFunction::Sha512 => "sha512",
            DigestFunction::Blake3 => "blake3",
        }
    }

    pub fn from_name(name: &str) -> Option<DigestFunction> {
        match name {
            "md5" => Some(DigestFunction::Md5),
            "sha1" => Some(DigestFunction::Sha1),
            "sha256" => Some(DigestFunction::Sha256),
            "sha384" => Some(DigestFunction::Sha384),
            "sha512" => Some(DigestFunction::Sha512),
            "blake3" => Some(DigestFunction::Blake3),
            _ => None,
        }
    }

    /// The remote execution protocol's enumeration value for this function.
    pub fn enum_value(self) -> u8 {
        match self {
            DigestFunction::Md5 => 3,
            DigestFunction::Sha1 => 2,
            DigestFunction::Sha256 => 1,
            DigestFunction::Sha384 => 5,
            DigestFunction::Sha512 => 6,
            DigestFunction::Blake3 => 9,
        }
    }

    pub fn from_enum_value(value: u8) -> Option<DigestFunction> {
        match value {
            1 => Some(DigestFunction::Sha256),
            2 => Some(DigestFunction::Sha1),
            3 => Some(DigestFunction::Md5),
            5 => Some(DigestFunction::Sha384),
            6 => Some(DigestFunction::Sha512),
            9 => Some(DigestFunction::Blake3),
            _ => None,
        }
    }
}

impl fmt::Display for DigestFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

///
/// A compression scheme that may appear in `compressed-blobs` resource names.
///
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Compressor {
    Identity,
    Zstd,
    Deflate,
}

impl Compressor {
    pub fn name(self) -> &'static str {
        match self {
            Compressor::Identity => "identity",
            Compressor::Zstd => "zstd",
            Compressor::Deflate => "deflate",
        }
    }

    pub fn from_name(name: &str) -> Option<Compressor> {
        match name {
            "identity" => Some(Compressor::Identity),
            "zstd" => Some(Compressor::Zstd),
            "deflate" => Some(Compressor::Deflate),
            _ => None,
        }
    }
}

///
/// Controls whether the string key of a Digest includes its instance name.
///
/// Backends that share storage across instance names key without it, so that identical content
/// uploaded under two names is stored once. When two backends with different formats are
/// composed, the more restrictive format (the one that distinguishes more keys) wins.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum KeyFormat {
    WithoutInstance,
    WithInstance,
}

impl KeyFormat {
    pub fn combine(self, other: KeyFormat) -> KeyFormat {
        match (self, other) {
            (KeyFormat::WithoutInstance, KeyFormat::WithoutInstance) => KeyFormat::WithoutInstance,
            _ => KeyFormat::WithInstance,
        }
    }
}

///
/// An (instance name, digest function) pair: everything needed to mint new Digests, either from
/// a known hash or by hashing data.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Function {
    instance_name: InstanceName,
    digest_function: DigestFunction,
}

impl Function {
    pub fn new(instance_name: InstanceName, digest_function: DigestFunction) -> Function {
        Function {
            instance_name,
            digest_function,
        }
    }

    /// Constructs a Function from the name of a digest function, rejecting algorithms this
    /// build does not support.
    pub fn with_algorithm_name(
        instance_name: InstanceName,
        algorithm: &str,
    ) -> Result<Function, Status> {
        let digest_function = DigestFunction::from_name(algorithm).ok_or_else(|| {
            Status::invalid_argument(format!("Unsupported digest function {algorithm:?}"))
        })?;
        Ok(Function::new(instance_name, digest_function))
    }

    pub fn instance_name(&self) -> &InstanceName {
        &self.instance_name
    }

    pub fn digest_function(&self) -> DigestFunction {
        self.digest_function
    }

    /// Validates a raw hash string and size against this function, yielding a Digest.
    pub fn new_digest(&self, hash: &str, size_bytes: i64) -> Result<Digest, Status> {
        let expected = self.digest_function.hash_length() * 2;
        if hash.len() != expected {
            return Err(Status::invalid_argument(format!(
                "Hash has length {}, while {} characters were expected",
                hash.len(),
                expected
            )));
        }
        let fingerprint = Fingerprint::from_hex_string(hash).map_err(Status::invalid_argument)?;
        let size_bytes = u64::try_from(size_bytes).map_err(|_| {
            Status::invalid_argument(format!("Invalid blob size: {size_bytes} is negative"))
        })?;
        Ok(Digest {
            digest_function: self.digest_function,
            hash: fingerprint,
            size_bytes,
            instance_name: self.instance_name.clone(),
        })
    }

    /// Returns a streaming hasher that yields a Digest of everything written through it.
    pub fn new_generator(&self) -> Generator {
        let hasher = match self.digest_function {
            DigestFunction::Md5 => AnyHasher::Md5(Md5::new()),
            DigestFunction::Sha1 => AnyHasher::Sha1(Sha1::new()),
            DigestFunction::Sha256 => AnyHasher::Sha256(Sha256::new()),
            DigestFunction::Sha384 => AnyHasher::Sha384(Sha384::new()),
            DigestFunction::Sha512 => AnyHasher::Sha512(Sha512::new()),
            DigestFunction::Blake3 => AnyHasher::Blake3(Box::new(blake3::Hasher::new())),
        };
        Generator {
            function: self.clone(),
            hasher,
            size_bytes: 0,
        }
    }

    /// The digest of the zero-length blob under this function.
    pub fn empty_digest(&self) -> Digest {
        self.new_generator().finish()
    }
}

enum AnyHasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha384(Sha384),
    Sha512(Sha512),
    Blake3(Box<blake3::Hasher>),
}

///
/// A streaming hasher and size counter, producing a Digest for data of previously unknown size.
///
pub struct Generator {
    function: Function,
    hasher: AnyHasher,
    size_bytes: u64,
}

impl Generator {
    pub fn update(&mut self, data: &[u8]) {
        match &mut self.hasher {
            AnyHasher::Md5(h) => h.update(data),
            AnyHasher::Sha1(h) => h.update(data),
            AnyHasher::Sha256(h) => h.update(data),
            AnyHasher::Sha384(h) => h.update(data),
            AnyHasher::Sha512(h) => h.update(data),
            AnyHasher::Blake3(h) => {
                h.update(data);
            }
        }
        self.size_bytes += data.len() as u64;
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn finish(self) -> Digest {
        let hash = match self.hasher {
            AnyHasher::Md5(h) => Fingerprint::from_bytes(&h.finalize()),
            AnyHasher::Sha1(h) => Fingerprint::from_bytes(&h.finalize()),
            AnyHasher::Sha256(h) => Fingerprint::from_bytes(&h.finalize()),
            AnyHasher::Sha384(h) => Fingerprint::from_bytes(&h.finalize()),
            AnyHasher::Sha512(h) => Fingerprint::from_bytes(&h.finalize()),
            AnyHasher::Blake3(h) => Fingerprint::from_bytes(h.finalize().as_bytes()),
        }
        .expect("digest function output exceeded MAX_HASH_LENGTH");
        Digest {
            digest_function: self.function.digest_function,
            hash,
            size_bytes: self.size_bytes,
            instance_name: self.function.instance_name,
        }
    }
}

impl Write for Generator {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

///
/// The identity of a blob: a digest function, its hash of the contents, the size of the contents
/// and the instance name under which the blob lives.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Digest {
    digest_function: DigestFunction,
    hash: Fingerprint,
    size_bytes: u64,
    instance_name: InstanceName,
}

impl Digest {
    pub fn digest_function(&self) -> DigestFunction {
        self.digest_function
    }

    pub fn hash(&self) -> &Fingerprint {
        &self.hash
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn instance_name(&self) -> &InstanceName {
        &self.instance_name
    }

    /// The Function that minted this Digest, for deriving sibling Digests.
    pub fn function(&self) -> Function {
        Function::new(self.instance_name.clone(), self.digest_function)
    }

    /// The same blob identity under a different instance name.
    pub fn with_instance_name(&self, instance_name: InstanceName) -> Digest {
        Digest {
            digest_function: self.digest_function,
            hash: self.hash,
            size_bytes: self.size_bytes,
            instance_name,
        }
    }

    pub fn is_empty_blob(&self) -> bool {
        self.size_bytes == 0 && self.hash == *self.function().empty_digest().hash()
    }

    /// The string under which backends key this blob.
    pub fn get_key(&self, format: KeyFormat) -> String {
        match format {
            KeyFormat::WithoutInstance => format!(
                "{}-{}-{}",
                self.hash.to_hex(),
                self.size_bytes,
                self.digest_function.name()
            ),
            KeyFormat::WithInstance => format!(
                "{}-{}-{}-{}",
                self.hash.to_hex(),
                self.size_bytes,
                self.digest_function.name(),
                self.instance_name
            ),
        }
    }

    ///
    /// A compact binary form (1-byte digest function value, raw hash, varint size) for embedding
    /// in opaque tokens. The instance name is not included; callers that need it must attach it
    /// externally.
    ///
    pub fn to_compact_binary(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.hash.len() + 10);
        out.push(self.digest_function.enum_value());
        out.extend_from_slice(self.hash.as_bytes());
        let mut v = self.size_bytes;
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
        out
    }

    pub fn from_compact_binary(data: &[u8], instance_name: InstanceName) -> Result<Digest, Status> {
        let function = data
            .first()
            .and_then(|v| DigestFunction::from_enum_value(*v))
            .ok_or_else(|| Status::invalid_argument("Unknown digest function value"))?;
        let hash_length = function.hash_length();
        if data.len() < 1 + hash_length + 1 {
            return Err(Status::invalid_argument(
                "Compact digest is too short to contain a hash and size",
            ));
        }
        let hash = Fingerprint::from_bytes(&data[1..1 + hash_length])
            .map_err(Status::invalid_argument)?;
        let mut size_bytes: u64 = 0;
        let mut shift = 0u32;
        let mut consumed = 1 + hash_length;
        for &byte in &data[1 + hash_length..] {
            consumed += 1;
            let bits = u64::from(byte & 0x7f);
            size_bytes |= bits
                .checked_shl(shift)
                .filter(|_| shift < 64)
                .ok_or_else(|| Status::invalid_argument("Compact digest size overflows"))?;
            if byte & 0x80 == 0 {
                if consumed != data.len() {
                    return Err(Status::invalid_argument(
                        "Compact digest has trailing garbage",
                    ));
                }
                return Ok(Digest {
                    digest_function: function,
                    hash,
                    size_bytes,
                    instance_name,
                });
            }
            shift += 7;
        }
        Err(Status::invalid_argument("Compact digest size is truncated"))
    }

    ///
    /// All digests with instance names that are prefixes of this digest's instance name, ordered
    /// ascending by length and therefore starting with the empty instance name. Hierarchical
    /// lookups walk this list back to front.
    ///
    pub fn get_digests_with_parent_instance_names(&self) -> Vec<Digest> {
        self.instance_name
            .prefixes()
            .into_iter()
            .map(|instance_name| self.with_instance_name(instance_name))
            .collect()
    }

    /// The byte stream resource name under which this blob may be read.
    pub fn get_byte_stream_read_path(&self, compressor: Compressor) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(6);
        if !self.instance_name.is_empty() {
            parts.push(self.instance_name.as_str().to_owned());
        }
        self.push_blobs_components(compressor, &mut parts);
        parts.join("/")
    }

    /// The byte stream resource name under which this blob may be written.
    pub fn get_byte_stream_write_path(&self, uuid: Uuid, compressor: Compressor) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(8);
        if !self.instance_name.is_empty() {
            parts.push(self.instance_name.as_str().to_owned());
        }
        parts.push("uploads".to_owned());
        parts.push(uuid.to_string());
        self.push_blobs_components(compressor, &mut parts);
        parts.join("/")
    }

    fn push_blobs_components(&self, compressor: Compressor, parts: &mut Vec<String>) {
        match compressor {
            Compressor::Identity => parts.push("blobs".to_owned()),
            c => {
                parts.push("compressed-blobs".to_owned());
                parts.push(c.name().to_owned());
            }
        }
        if self.digest_function != DigestFunction::Sha256 {
            parts.push(self.digest_function.name().to_owned());
        }
        parts.push(self.hash.to_hex());
        parts.push(self.size_bytes.to_string());
    }

    /// Parses any legal byte stream read resource name.
    pub fn parse_byte_stream_read_path(path: &str) -> Result<(Digest, Compressor), Status> {
        let parts: Vec<&str> = path.split('/').collect();
        let marker = parts
            .iter()
            .position(|p| *p == "blobs" || *p == "compressed-blobs")
            .ok_or_else(|| {
                Status::invalid_argument(format!(
                    "Resource name {path:?} contains no \"blobs\" component"
                ))
            })?;
        let instance_name = InstanceName::new(parts[..marker].join("/"))?;
        let (compressor, rest) = split_compressor(&parts, marker, path)?;
        let digest = parse_digest_components(rest, instance_name, false, path)?;
        Ok((digest, compressor))
    }

    /// Parses any legal byte stream write resource name. The client-chosen UUID is validated and
    /// discarded; trailing metadata after the size component is permitted.
    pub fn parse_byte_stream_write_path(path: &str) -> Result<(Digest, Compressor), Status> {
        let parts: Vec<&str> = path.split('/').collect();
        let marker = parts.iter().position(|p| *p == "uploads").ok_or_else(|| {
            Status::invalid_argument(format!(
                "Resource name {path:?} contains no \"uploads\" component"
            ))
        })?;
        let instance_name = InstanceName::new(parts[..marker].join("/"))?;
        let uuid = parts.get(marker + 1).ok_or_else(|| {
            Status::invalid_argument(format!("Resource name {path:?} is missing an upload UUID"))
        })?;
        Uuid::parse_str(uuid).map_err(|e| {
            Status::invalid_argument(format!("Invalid UUID {uuid:?} in resource name: {e}"))
        })?;
        match parts.get(marker + 2) {
            Some(&"blobs") | Some(&"compressed-blobs") => {}
            _ => {
                return Err(Status::invalid_argument(format!(
                    "Resource name {path:?} is missing a \"blobs\" component after the UUID"
                )))
            }
        }
        let (compressor, rest) = split_compressor(&parts, marker + 2, path)?;
        let digest = parse_digest_components(rest, instance_name, true, path)?;
        Ok((digest, compressor))
    }
}

fn split_compressor<'a, 'b>(
    parts: &'b [&'a str],
    marker: usize,
    path: &str,
) -> Result<(Compressor, &'b [&'a str]), Status> {
    if parts[marker] == "compressed-blobs" {
        let name = parts.get(marker + 1).ok_or_else(|| {
            Status::invalid_argument(format!("Resource name {path:?} is missing a compressor"))
        })?;
        let compressor = Compressor::from_name(name).ok_or_else(|| {
            Status::invalid_argument(format!("Unsupported compression scheme {name:?}"))
        })?;
        Ok((compressor, &parts[marker + 2..]))
    } else {
        Ok((Compressor::Identity, &parts[marker + 1..]))
    }
}

///
/// Parses the `[{digestFunction}/]{hash}/{size}` tail of a resource name. The digest function
/// component is recognized by name; when it is absent the function is inferred from the hash
/// length, which is unambiguous for functions with wire values of 7 and below.
///
fn parse_digest_components(
    parts: &[&str],
    instance_name: InstanceName,
    allow_trailing: bool,
    path: &str,
) -> Result<Digest, Status> {
    let (function, rest) = match parts.first().and_then(|p| DigestFunction::from_name(p)) {
        Some(function) => (Some(function), &parts[1..]),
        None => (None, parts),
    };
    let (hash, size, trailing) = match rest {
        [hash, size, trailing @ ..] => (*hash, *size, trailing),
        _ => {
            return Err(Status::invalid_argument(format!(
                "Resource name {path:?} is missing hash and size components"
            )))
        }
    };
    if !trailing.is_empty() && !allow_trailing {
        return Err(Status::invalid_argument(format!(
            "Resource name {path:?} has trailing components"
        )));
    }
    let function = match function {
        Some(function) => function,
        None => DigestFunction::from_hash_length(hash.len() / 2).ok_or_else(|| {
            Status::invalid_argument(format!(
                "Resource name {path:?} contains a hash of unsupported length {}",
                hash.len()
            ))
        })?,
    };
    let size_bytes = size.parse::<i64>().map_err(|_| {
        Status::invalid_argument(format!("Invalid blob size {size:?} in resource name"))
    })?;
    Function::new(instance_name, function).new_digest(hash, size_bytes)
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get_key(KeyFormat::WithInstance))
    }
}

impl PartialOrd for Digest {
    fn partial_cmp(&self, other: &Digest) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Digest {
    /// Digests order by their string form, which is what DigestSet sorts by. Sizes compare as
    /// decimal strings, not numerically.
    fn cmp(&self, other: &Digest) -> Ordering {
        self.hash
            .cmp(&other.hash)
            .then_with(|| {
                self.size_bytes
                    .to_string()
                    .cmp(&other.size_bytes.to_string())
            })
            .then_with(|| self.digest_function.name().cmp(other.digest_function.name()))
            .then_with(|| self.instance_name.cmp(&other.instance_name))
    }
}
