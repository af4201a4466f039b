//! FNV-1a hashing for routing messages to transport partitions.
//!
//! Every message of one tenant must land on the same partition so that the
//! repository worker observes a commit session's steps in send order. The
//! partition is `fnv1a_hash(tenant_id) % partition_count`.

use crate::types::TenantId;

/// FNV-1a offset basis (32-bit).
const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;

/// FNV-1a prime (32-bit).
const FNV_PRIME: u32 = 0x0100_0193;

/// Computes a 32-bit FNV-1a hash over the bytes of a string.
///
/// # Examples
///
/// ```
/// use entityvc_core::hash::fnv1a_hash;
///
/// assert_eq!(fnv1a_hash(""), 2_166_136_261); // FNV offset basis
/// assert_eq!(fnv1a_hash("hello"), 1_335_831_723);
/// ```
#[must_use]
pub fn fnv1a_hash(s: &str) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in s.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Partition that carries all messages of `tenant_id`.
///
/// `partition_count` of zero is treated as one partition.
#[must_use]
pub fn tenant_partition(tenant_id: &TenantId, partition_count: u32) -> u32 {
    fnv1a_hash(&tenant_id.to_string()) % partition_count.max(1)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use uuid::Uuid;

    use super::*;

    #[test]
    fn fnv1a_hash_known_vectors() {
        assert_eq!(fnv1a_hash(""), 2_166_136_261);
        assert_eq!(fnv1a_hash("hello"), 1_335_831_723);
        assert_eq!(fnv1a_hash("a"), 0xe40c_292c);
    }

    #[test]
    fn tenant_partition_is_stable() {
        let tenant = TenantId(Uuid::nil());
        let first = tenant_partition(&tenant, 7);
        for _ in 0..10 {
            assert_eq!(tenant_partition(&tenant, 7), first);
        }
    }

    #[test]
    fn zero_partitions_maps_to_partition_zero() {
        assert_eq!(tenant_partition(&TenantId::new(), 0), 0);
    }

    proptest! {
        #[test]
        fn tenant_partition_in_range(bytes in any::<[u8; 16]>(), count in 1u32..64) {
            let tenant = TenantId(Uuid::from_bytes(bytes));
            prop_assert!(tenant_partition(&tenant, count) < count);
        }
    }
}
