//! Key encoding utilities.
//!
//! Primary keys are the raw 16 bytes of the record ID. Composite index keys
//! are `owner (16 bytes) || record (16 bytes)`; since ULIDs are time-ordered,
//! a prefix scan over an owner yields its records oldest first.

use meterline_core::{
    CouponId, FeatureEndpointId, FeatureId, LedgerEntryId, PackageId, PackagePlanId,
    PackageTransactionId, PaymentTransactionId, PlanId, ProfitRuleId, UsageRecordId, UserId,
    WalletId,
};

/// Lock key taken by every writer of a package's `is_initial` flag.
pub const INITIAL_PACKAGE_LOCK: &[u8] = b"initial_package";

/// Create a wallet key from a wallet ID.
#[must_use]
pub fn wallet_key(wallet_id: &WalletId) -> Vec<u8> {
    wallet_id.as_bytes().to_vec()
}

/// Create a user key (live wallet index).
#[must_use]
pub fn user_key(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Create a ledger entry key.
#[must_use]
pub fn ledger_key(entry_id: &LedgerEntryId) -> Vec<u8> {
    entry_id.to_bytes().to_vec()
}

/// Create a user-ledger index key.
///
/// Format: `user_id (16 bytes) || entry_id (16 bytes)`
#[must_use]
pub fn user_ledger_key(user_id: &UserId, entry_id: &LedgerEntryId) -> Vec<u8> {
    composite(user_id.as_bytes(), &entry_id.to_bytes())
}

/// Create a prefix for iterating everything a user owns in an index.
#[must_use]
pub fn user_prefix(user_id: &UserId) -> Vec<u8> {
    user_id.as_bytes().to_vec()
}

/// Extract the ledger entry ID from a user-ledger index key.
#[must_use]
pub fn extract_ledger_id(key: &[u8]) -> Option<LedgerEntryId> {
    suffix(key).map(LedgerEntryId::from_bytes)
}

/// Create a payment transaction key.
#[must_use]
pub fn payment_key(payment_id: &PaymentTransactionId) -> Vec<u8> {
    payment_id.as_bytes().to_vec()
}

/// Create a usage record key.
#[must_use]
pub fn usage_record_key(record_id: &UsageRecordId) -> Vec<u8> {
    record_id.to_bytes().to_vec()
}

/// Create a usage-key index key from a caller-supplied key.
#[must_use]
pub fn usage_key(key: &str) -> Vec<u8> {
    key.as_bytes().to_vec()
}

/// Create a feature key.
#[must_use]
pub fn feature_key(feature_id: &FeatureId) -> Vec<u8> {
    feature_id.as_bytes().to_vec()
}

/// Create a feature endpoint key.
#[must_use]
pub fn feature_endpoint_key(endpoint_id: &FeatureEndpointId) -> Vec<u8> {
    endpoint_id.as_bytes().to_vec()
}

/// Create a package key.
#[must_use]
pub fn package_key(package_id: &PackageId) -> Vec<u8> {
    package_id.as_bytes().to_vec()
}

/// Create a plan key.
#[must_use]
pub fn plan_key(plan_id: &PlanId) -> Vec<u8> {
    plan_id.as_bytes().to_vec()
}

/// Create a package-plan key.
#[must_use]
pub fn package_plan_key(package_plan_id: &PackagePlanId) -> Vec<u8> {
    package_plan_id.as_bytes().to_vec()
}

/// Create a package-plan index key.
///
/// Format: `package_id (16 bytes) || package_plan_id (16 bytes)`
#[must_use]
pub fn package_plan_index_key(package_id: &PackageId, package_plan_id: &PackagePlanId) -> Vec<u8> {
    composite(package_id.as_bytes(), package_plan_id.as_bytes())
}

/// Extract the package-plan ID from a package-plan index key.
#[must_use]
pub fn extract_package_plan_id(key: &[u8]) -> Option<PackagePlanId> {
    suffix(key).map(PackagePlanId::from_bytes)
}

/// Create a profit rule key.
#[must_use]
pub fn profit_rule_key(rule_id: &ProfitRuleId) -> Vec<u8> {
    rule_id.as_bytes().to_vec()
}

/// Create a coupon key.
#[must_use]
pub fn coupon_key(coupon_id: &CouponId) -> Vec<u8> {
    coupon_id.as_bytes().to_vec()
}

/// Create a coupon code index key from a normalized code.
#[must_use]
pub fn coupon_code_key(code: &str) -> Vec<u8> {
    code.as_bytes().to_vec()
}

/// Create a package transaction key.
#[must_use]
pub fn package_transaction_key(id: &PackageTransactionId) -> Vec<u8> {
    id.to_bytes().to_vec()
}

/// Create a user-package-transaction index key.
#[must_use]
pub fn user_package_transaction_key(user_id: &UserId, id: &PackageTransactionId) -> Vec<u8> {
    composite(user_id.as_bytes(), &id.to_bytes())
}

/// Extract the package transaction ID from a user index key.
#[must_use]
pub fn extract_package_transaction_id(key: &[u8]) -> Option<PackageTransactionId> {
    suffix(key).map(PackageTransactionId::from_bytes)
}

/// Read a 16-byte ID stored as an index value.
#[must_use]
pub fn id_bytes(value: &[u8]) -> Option<[u8; 16]> {
    value.try_into().ok()
}

fn composite(owner: &[u8; 16], record: &[u8; 16]) -> Vec<u8> {
    let mut key = Vec::with_capacity(32);
    key.extend_from_slice(owner);
    key.extend_from_slice(record);
    key
}

fn suffix(key: &[u8]) -> Option<[u8; 16]> {
    key.get(16..32)?.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wallet_key_length() {
        let key = wallet_key(&WalletId::generate());
        assert_eq!(key.len(), 16);
    }

    #[test]
    fn user_ledger_key_format() {
        let user_id = UserId::generate();
        let entry_id = LedgerEntryId::generate();
        let key = user_ledger_key(&user_id, &entry_id);

        assert_eq!(key.len(), 32);
        assert_eq!(&key[..16], user_id.as_bytes());
        assert_eq!(&key[16..], entry_id.to_bytes());
        assert!(key.starts_with(&user_prefix(&user_id)));
    }

    #[test]
    fn extract_ledger_id_roundtrip() {
        let user_id = UserId::generate();
        let entry_id = LedgerEntryId::generate();
        let key = user_ledger_key(&user_id, &entry_id);
        assert_eq!(extract_ledger_id(&key), Some(entry_id));
    }

    #[test]
    fn short_keys_do_not_panic() {
        assert_eq!(extract_ledger_id(&[0u8; 20]), None);
        assert_eq!(extract_package_plan_id(&[]), None);
        assert_eq!(id_bytes(&[1, 2, 3]), None);
    }

    #[test]
    fn package_plan_index_groups_by_package() {
        let package = PackageId::generate();
        let a = package_plan_index_key(&package, &PackagePlanId::generate());
        let b = package_plan_index_key(&package, &PackagePlanId::generate());
        assert_eq!(a[..16], b[..16]);
        assert_eq!(&a[..16], package_key(&package).as_slice());
    }
}
