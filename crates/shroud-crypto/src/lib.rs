pub mod aes_gcm;
pub mod compress;
pub mod envelope;
pub mod key;

pub use compress::Compression;
pub use envelope::{Decoded, EnvelopeCodec, EnvelopeInfo, Packing};
pub use key::{KdfParams, SiteKey};

/// Hard cap on the bytes a single envelope may carry (64 MiB).
/// Independent of any policy; callers must not encode anything larger.
pub const MAX_PLAINTEXT_SIZE: usize = 64 * 1024 * 1024;

/// Cap on the unencrypted side channel of an envelope.
pub const MAX_EXTRA_SIZE: usize = 64 * 1024;
