//! Coupon operations.

use chrono::Utc;

use meterline_core::{normalize_code, Coupon, CouponId};

use crate::error::{Result, StoreError};
use crate::keys;
use crate::schema::cf;
use crate::Txn;

impl Txn<'_> {
    /// Get a coupon by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn coupon(&mut self, coupon_id: &CouponId) -> Result<Option<Coupon>> {
        self.read(cf::COUPONS, &keys::coupon_key(coupon_id))
    }

    /// Get a coupon by its code, in any letter case.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn coupon_by_code(&mut self, code: &str) -> Result<Option<Coupon>> {
        let key = keys::coupon_code_key(&normalize_code(code));
        let Some(value) = self.read_raw(cf::COUPONS_BY_CODE, &key)? else {
            return Ok(None);
        };
        let coupon_id = keys::id_bytes(&value)
            .map(CouponId::from_bytes)
            .ok_or_else(|| StoreError::Database("malformed coupon index value".into()))?;
        self.coupon(&coupon_id)
    }

    /// Insert or update a coupon and its code index.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Duplicate`] if another coupon uses the same code.
    pub fn put_coupon(&mut self, coupon: &Coupon) -> Result<()> {
        let code_key = keys::coupon_code_key(&normalize_code(&coupon.code));
        if let Some(owner) = self.read_raw_for_update(cf::COUPONS_BY_CODE, &code_key)? {
            if owner.as_slice() != coupon.id.as_bytes() {
                return Err(StoreError::duplicate("coupon code", &coupon.code));
            }
        }
        if let Some(previous) = self.coupon(&coupon.id)? {
            let previous_key = keys::coupon_code_key(&normalize_code(&previous.code));
            if previous_key != code_key {
                self.remove(cf::COUPONS_BY_CODE, &previous_key)?;
            }
        }
        self.write(cf::COUPONS, &keys::coupon_key(&coupon.id), coupon)?;
        self.write_raw(cf::COUPONS_BY_CODE, &code_key, coupon.id.as_bytes().to_vec())
    }

    /// Record one redemption of a coupon.
    ///
    /// Returns the coupon after the increment.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the coupon does not exist.
    pub fn increment_coupon_usage(&mut self, coupon_id: &CouponId) -> Result<Coupon> {
        let key = keys::coupon_key(coupon_id);
        let mut coupon: Coupon = self
            .read_for_update(cf::COUPONS, &key)?
            .ok_or_else(|| StoreError::not_found("coupon", coupon_id))?;
        coupon.usage_count = coupon.usage_count.saturating_add(1);
        coupon.updated_at = Utc::now();
        self.write(cf::COUPONS, &key, &coupon)?;
        Ok(coupon)
    }
}
