use std::io::{Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Error;

/// Magic bytes identifying the on-wire module container, chosen to be the 4-byte ASCII tag
/// `ZIPL`.
pub const MAGIC: [u8; 4] = *b"ZIPL";

/// Container format version this crate writes and understands.
pub const CURRENT_VERSION: u32 = 1;

/// A single module's compiled bytecode container, framed as:
/// 4-byte magic, 4-byte big-endian version, 4-byte big-endian length, then the bytecode itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZiplineFile {
    pub version: u32,
    pub bytecode: Vec<u8>,
}

impl ZiplineFile {
    pub fn new(bytecode: Vec<u8>) -> Self {
        Self {
            version: CURRENT_VERSION,
            bytecode,
        }
    }

    pub fn write_to(&self, w: &mut impl Write) -> Result<(), Error> {
        w.write_all(&MAGIC)
            .and_then(|_| w.write_u32::<BigEndian>(self.version))
            .and_then(|_| w.write_u32::<BigEndian>(self.bytecode.len() as u32))
            .and_then(|_| w.write_all(&self.bytecode))
            .map_err(|e| Error::MalformedManifest(format!("failed writing zipline file: {e}")))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(12 + self.bytecode.len());
        self.write_to(&mut out)
            .expect("writing to Vec is infallible");
        out
    }

    pub fn read_from(r: &mut impl Read) -> Result<Self, ZiplineFileError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic)
            .map_err(|_| ZiplineFileError::Malformed("short read of magic".to_string()))?;
        if magic != MAGIC {
            return Err(ZiplineFileError::Malformed(format!(
                "bad magic {magic:?}, expected {MAGIC:?}"
            )));
        }
        let version = r
            .read_u32::<BigEndian>()
            .map_err(|_| ZiplineFileError::Malformed("short read of version".to_string()))?;
        if version != CURRENT_VERSION {
            return Err(ZiplineFileError::UnsupportedVersion(version));
        }
        let len = r
            .read_u32::<BigEndian>()
            .map_err(|_| ZiplineFileError::Malformed("short read of length".to_string()))?;
        let mut bytecode = vec![0u8; len as usize];
        r.read_exact(&mut bytecode)
            .map_err(|_| ZiplineFileError::Malformed("short read of bytecode".to_string()))?;
        Ok(Self { version, bytecode })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ZiplineFileError {
    #[error("malformed zipline file: {0}")]
    Malformed(String),
    #[error("unsupported zipline file version {0}")]
    UnsupportedVersion(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let file = ZiplineFile::new(vec![1, 2, 3, 4, 5]);
        let bytes = file.to_bytes();
        let parsed = ZiplineFile::read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(file, parsed);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = [0u8; 12];
        assert!(matches!(
            ZiplineFile::read_from(&mut bytes.as_slice()),
            Err(ZiplineFileError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&99u32.to_be_bytes());
        bytes.extend_from_slice(&0u32.to_be_bytes());
        assert!(matches!(
            ZiplineFile::read_from(&mut bytes.as_slice()),
            Err(ZiplineFileError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn rejects_short_read() {
        let bytes = [b'Z', b'I', b'P'];
        assert!(matches!(
            ZiplineFile::read_from(&mut bytes.as_slice()),
            Err(ZiplineFileError::Malformed(_))
        ));
    }
}
