pub mod bloom_filter;

use crate::memory::key_types::extract_user_key;
use std::sync::Arc;

pub use bloom_filter::BloomFilterPolicy;

pub const SEED: u32 = 0xc7b4e193;

/// Builds compact summaries of key sets that answer "may this key be in the set?".
pub trait FilterPolicy: Send + Sync {
    /// Persisted next to the filters. A reader must use a policy with the same name.
    fn name(&self) -> &'static str;

    /// Append a filter summarizing `keys` to `dst`.
    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>);

    /// Must return true if `key` was in the key set `filter` was built from.
    /// May return true for other keys, with low probability.
    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool;
}

/// Applies a user-key policy to internal keys by stripping their tags.
pub struct InternalFilterPolicy {
    user_policy: Arc<dyn FilterPolicy>,
}

impl InternalFilterPolicy {
    pub fn new(user_policy: Arc<dyn FilterPolicy>) -> InternalFilterPolicy {
        InternalFilterPolicy { user_policy }
    }
}

impl FilterPolicy for InternalFilterPolicy {
    fn name(&self) -> &'static str {
        self.user_policy.name()
    }

    fn create_filter(&self, keys: &[&[u8]], dst: &mut Vec<u8>) {
        let user_keys: Vec<&[u8]> = keys.iter().map(|k| extract_user_key(k)).collect();
        self.user_policy.create_filter(&user_keys, dst);
    }

    fn key_may_match(&self, key: &[u8], filter: &[u8]) -> bool {
        self.user_policy
            .key_may_match(extract_user_key(key), filter)
    }
}
