//! Mongo persistence for orders and promo codes.
//!
//! Concurrency correctness lives at this boundary: multiple service instances
//! may run at once, so every state-changing write is a conditional
//! `update_one` whose filter encodes the expected prior state, and success is
//! judged by the modified-document count. Nothing here reads then writes in
//! separate steps.

use crate::models::{OrderStatus, PromoCode, PromoCodeUsage, TuneOrder};
use anyhow::Result;
use futures::TryStreamExt;
use mongodb::bson::{doc, to_bson, Bson, DateTime};
use mongodb::options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument};
use mongodb::{Collection, Database, IndexModel};
use uuid::Uuid;

use crate::models::AnalysisResult;

#[derive(Clone)]
pub struct TuneRepository {
    orders: Collection<TuneOrder>,
    promo_codes: Collection<PromoCode>,
    promo_usages: Collection<PromoCodeUsage>,
}

/// Encode a UUID the way the driver's raw document serializer stores it
/// (generic binary), so id filters match inserted documents.
fn uuid_bson(id: Uuid) -> Bson {
    Bson::Binary(mongodb::bson::Binary {
        subtype: mongodb::bson::spec::BinarySubtype::Generic,
        bytes: id.into_bytes().to_vec(),
    })
}

/// True when a write failed on a unique index.
pub fn is_duplicate_key_error(err: &mongodb::error::Error) -> bool {
    use mongodb::error::{ErrorKind, WriteFailure};
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == 11000,
        ErrorKind::Command(ce) => ce.code == 11000,
        _ => false,
    }
}

impl TuneRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            orders: db.collection("orders"),
            promo_codes: db.collection("promo_codes"),
            promo_usages: db.collection("promo_code_usages"),
        }
    }

    /// Initialize unique indexes. Order numbers and (normalized) promo codes
    /// must be unique at the store level, not just at generation time.
    pub async fn init_indexes(&self) -> Result<()> {
        let order_number_index = IndexModel::builder()
            .keys(doc! { "order_number": 1 })
            .options(
                IndexOptions::builder()
                    .name("unique_order_number_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        let checkout_ref_index = IndexModel::builder()
            .keys(doc! { "checkout_ref": 1 })
            .options(
                IndexOptions::builder()
                    .name("checkout_ref_idx".to_string())
                    .build(),
            )
            .build();
        self.orders
            .create_indexes([order_number_index, checkout_ref_index], None)
            .await?;

        let code_index = IndexModel::builder()
            .keys(doc! { "code": 1 })
            .options(
                IndexOptions::builder()
                    .name("unique_promo_code_idx".to_string())
                    .unique(true)
                    .build(),
            )
            .build();
        self.promo_codes.create_indexes([code_index], None).await?;

        let usage_index = IndexModel::builder()
            .keys(doc! { "promo_code_id": 1, "used_at": 1 })
            .options(
                IndexOptions::builder()
                    .name("promo_usage_idx".to_string())
                    .build(),
            )
            .build();
        self.promo_usages.create_indexes([usage_index], None).await?;

        tracing::info!("Tune service indexes initialized");
        Ok(())
    }

    // ---- Orders ----

    pub async fn insert_order(&self, order: &TuneOrder) -> mongodb::error::Result<()> {
        self.orders.insert_one(order, None).await?;
        Ok(())
    }

    pub async fn find_order(&self, id: Uuid) -> Result<Option<TuneOrder>> {
        let order = self.orders.find_one(doc! { "_id": uuid_bson(id) }, None).await?;
        Ok(order)
    }

    pub async fn find_order_by_number(&self, order_number: &str) -> Result<Option<TuneOrder>> {
        let order = self
            .orders
            .find_one(doc! { "order_number": order_number }, None)
            .await?;
        Ok(order)
    }

    pub async fn find_order_by_checkout_ref(&self, checkout_ref: &str) -> Result<Option<TuneOrder>> {
        let order = self
            .orders
            .find_one(doc! { "checkout_ref": checkout_ref }, None)
            .await?;
        Ok(order)
    }

    /// `pending -> paid`. Returns false when the order was not in `pending`,
    /// which is how webhook replays are absorbed without re-triggering.
    pub async fn mark_paid(&self, id: Uuid) -> Result<bool> {
        let result = self
            .orders
            .update_one(
                doc! { "_id": uuid_bson(id), "status": to_bson(&OrderStatus::Pending)? },
                doc! { "$set": {
                    "status": to_bson(&OrderStatus::Paid)?,
                    "paid_at": DateTime::now(),
                }},
                None,
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    /// `paid -> processing`. The claim for at-most-one active processing
    /// attempt per order: a concurrent trigger that loses this write sees
    /// false and must treat the run as a no-op.
    pub async fn begin_processing(&self, id: Uuid) -> Result<bool> {
        let result = self
            .orders
            .update_one(
                doc! { "_id": uuid_bson(id), "status": to_bson(&OrderStatus::Paid)? },
                doc! { "$set": { "status": to_bson(&OrderStatus::Processing)? } },
                None,
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    /// `processing -> completed`, persisting the outputs in the same write so
    /// a stale duplicate trigger can never overwrite a later state.
    pub async fn complete_order(
        &self,
        id: Uuid,
        analysis: &AnalysisResult,
        cli_commands: &str,
    ) -> Result<bool> {
        let result = self
            .orders
            .update_one(
                doc! { "_id": uuid_bson(id), "status": to_bson(&OrderStatus::Processing)? },
                doc! { "$set": {
                    "status": to_bson(&OrderStatus::Completed)?,
                    "analysis_result": to_bson(analysis)?,
                    "cli_commands": cli_commands,
                    "completed_at": DateTime::now(),
                    "error_message": Bson::Null,
                }},
                None,
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    /// Transition to `failed` from any of the given states.
    pub async fn fail_order(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        error_message: &str,
    ) -> Result<bool> {
        let from: Vec<Bson> = from.iter().map(to_bson).collect::<Result<_, _>>()?;
        let result = self
            .orders
            .update_one(
                doc! { "_id": uuid_bson(id), "status": { "$in": from } },
                doc! { "$set": {
                    "status": to_bson(&OrderStatus::Failed)?,
                    "error_message": error_message,
                }},
                None,
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    /// Forced reset: `completed|failed -> paid`, clearing prior outputs so a
    /// re-run starts from a clean slate.
    pub async fn reset_for_reprocess(&self, id: Uuid) -> Result<bool> {
        let from = vec![
            to_bson(&OrderStatus::Completed)?,
            to_bson(&OrderStatus::Failed)?,
        ];
        let result = self
            .orders
            .update_one(
                doc! { "_id": uuid_bson(id), "status": { "$in": from } },
                doc! {
                    "$set": { "status": to_bson(&OrderStatus::Paid)? },
                    "$unset": {
                        "analysis_result": "",
                        "cli_commands": "",
                        "report_storage_key": "",
                        "completed_at": "",
                        "delivered_at": "",
                        "error_message": "",
                    },
                },
                None,
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    /// Record delivery artifacts on a completed order.
    pub async fn mark_delivered(&self, id: Uuid, report_storage_key: &str) -> Result<bool> {
        let result = self
            .orders
            .update_one(
                doc! { "_id": uuid_bson(id), "status": to_bson(&OrderStatus::Completed)? },
                doc! { "$set": {
                    "report_storage_key": report_storage_key,
                    "delivered_at": DateTime::now(),
                }},
                None,
            )
            .await?;
        Ok(result.modified_count == 1)
    }

    // ---- Promo codes ----

    pub async fn insert_code(&self, code: &PromoCode) -> mongodb::error::Result<()> {
        self.promo_codes.insert_one(code, None).await?;
        Ok(())
    }

    pub async fn find_code(&self, normalized_code: &str) -> Result<Option<PromoCode>> {
        let code = self
            .promo_codes
            .find_one(doc! { "code": normalized_code }, None)
            .await?;
        Ok(code)
    }

    pub async fn list_codes(&self) -> Result<Vec<PromoCode>> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        let cursor = self.promo_codes.find(doc! {}, options).await?;
        let codes: Vec<PromoCode> = cursor.try_collect().await?;
        Ok(codes)
    }

    /// Soft-deactivate. Returns false for unknown codes.
    pub async fn deactivate_code(&self, normalized_code: &str) -> Result<bool> {
        let result = self
            .promo_codes
            .update_one(
                doc! { "code": normalized_code },
                doc! { "$set": { "is_active": false } },
                None,
            )
            .await?;
        Ok(result.matched_count == 1)
    }

    /// Atomic redemption: check-and-increment in one store-evaluated filter.
    ///
    /// The filter requires the code to be active, inside its validity window,
    /// and below its usage cap; `$expr` does the field-to-field compare of
    /// `used_count` against `max_uses`. Concurrent callers race on this single
    /// update, so at most `max_uses` of them can ever win; a loser matches no
    /// document and leaves the counter untouched.
    pub async fn redeem_code(&self, normalized_code: &str) -> Result<Option<PromoCode>> {
        let now = DateTime::now();
        let filter = doc! {
            "code": normalized_code,
            "is_active": true,
            "$and": [
                { "$or": [ { "valid_from": Bson::Null }, { "valid_from": { "$lte": now } } ] },
                { "$or": [ { "valid_until": Bson::Null }, { "valid_until": { "$gte": now } } ] },
                { "$or": [
                    { "max_uses": Bson::Null },
                    { "$expr": { "$lt": [ "$used_count", "$max_uses" ] } },
                ] },
            ],
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        let updated = self
            .promo_codes
            .find_one_and_update(filter, doc! { "$inc": { "used_count": 1 } }, options)
            .await?;
        Ok(updated)
    }

    /// Append-only audit trail; written after a winning increment.
    pub async fn record_usage(&self, usage: &PromoCodeUsage) -> Result<()> {
        self.promo_usages.insert_one(usage, None).await?;
        Ok(())
    }

    pub async fn usages_for_code(&self, promo_code_id: Uuid) -> Result<Vec<PromoCodeUsage>> {
        let cursor = self
            .promo_usages
            .find(doc! { "promo_code_id": uuid_bson(promo_code_id) }, None)
            .await?;
        let usages: Vec<PromoCodeUsage> = cursor.try_collect().await?;
        Ok(usages)
    }
}
