use std::fmt::{self, Display};

use getset::{CopyGetters, Getters};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const S_IFMT: u32 = 0o170000; // bit mask for the file type bit field
const S_IFREG: u32 = 0o100000; // regular file
const S_IRUSR: u32 = 0o400; // user has read permission

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Metadata for a registry blob.
///
/// A blob is always a regular, owner-readable file; the registry exposes no
/// timestamps or ownership, so none are fabricated here.
#[derive(Debug, Clone, CopyGetters, Getters, PartialEq, Eq)]
pub struct Metadata {
    /// The mode of the file, combining file type and permissions
    #[getset(get = "pub with_prefix")]
    mode: Mode,

    /// Size of the blob in bytes
    #[getset(get_copy = "pub with_prefix")]
    size: u64,
}

/// A Unix-style file mode restricted to what a registry blob can be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode(u32);

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Metadata {
    /// Creates metadata for a read-only regular file of `size` bytes.
    pub fn regular_readonly(size: u64) -> Self {
        Self {
            mode: Mode::regular_readonly(),
            size,
        }
    }

    /// Returns true when the mode denotes a regular file.
    pub fn is_file(&self) -> bool {
        self.mode.is_regular()
    }
}

impl Mode {
    /// The mode of a read-only regular file.
    pub fn regular_readonly() -> Self {
        Self(S_IFREG | S_IRUSR)
    }

    /// Returns the raw mode word.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Returns true when the file type bits denote a regular file.
    pub fn is_regular(&self) -> bool {
        self.0 & S_IFMT == S_IFREG
    }

    /// Returns true when the owner may read the file.
    pub fn is_readable(&self) -> bool {
        self.0 & S_IRUSR != 0
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_regular() { "-" } else { "?" };
        let read = if self.is_readable() { "r" } else { "-" };
        write!(f, "{}{}--------", kind, read)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_metadata_is_readonly_regular_file() {
        let metadata = Metadata::regular_readonly(42);
        assert!(metadata.is_file());
        assert!(metadata.get_mode().is_readable());
        assert_eq!(metadata.get_size(), 42);
        assert_eq!(metadata.get_mode().bits(), 0o100400);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(Mode::regular_readonly().to_string(), "-r--------");
    }
}
