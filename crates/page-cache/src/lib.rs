//! Building blocks shared by the render cache and its persistence API:
//! cache keys derived from canonical URLs, the [`Page`] entry type and the
//! process-wide [`PageCache`].

pub mod entry;
pub mod key;
pub mod sharded;
pub mod wire;

pub use entry::{now_millis, Expiration, Page};
pub use key::{is_valid_key, url_to_key, KEY_LEN};
pub use sharded::{CacheStats, PageCache};
pub use wire::{validate_partition, BufferJson, InvalidPartition, PageRecord, PageUpload};
