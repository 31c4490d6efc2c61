//! sled-backed persistence
//!
//! One keyspace, prefixed keys. Entity rows are keyed by their bech32 id
//! (`cmp_1…`, `app_1…`, `sub_1…`); everything else derives its key from the
//! owning entity so re-derivation is always possible:
//!
//!   pair_{campaign}:{influencer}  -> application id (uniqueness index)
//!   bal_{influencer}              -> Balance
//!   cnv_{application}             -> Conversation
//!   msgs_{conversation}:{uuid7}   -> Message
//!   fx_{sha256(entity:status)}    -> EffectRecord
//!   views_{campaign}, favs_{campaign} -> big-endian u64 counters

use crate::error::WorkflowError;
use crate::model::{Application, Balance, Campaign, Conversation, Message, Submission};
use crate::status::Status;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use sled::Db;
use std::sync::Arc;

pub struct Store {
    pub(crate) db: Arc<Db>,
}

impl Store {
    pub fn new(db: Arc<Db>) -> Self {
        Self { db }
    }

    fn fetch<T>(&self, key: &str) -> Result<Option<T>, WorkflowError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        self.db
            .get(key.as_bytes())?
            .map(|bytes| dec(&bytes))
            .transpose()
    }

    pub fn campaign(&self, id: &str) -> Result<Option<Campaign>, WorkflowError> {
        self.fetch(id)
    }

    pub fn application(&self, id: &str) -> Result<Option<Application>, WorkflowError> {
        self.fetch(id)
    }

    pub fn submission(&self, id: &str) -> Result<Option<Submission>, WorkflowError> {
        self.fetch(id)
    }

    /// Zero balance until the first effect touches it.
    pub fn balance(&self, influencer_id: &str) -> Result<Balance, WorkflowError> {
        Ok(self
            .fetch(&balance_key(influencer_id))?
            .unwrap_or_else(|| Balance::empty(influencer_id)))
    }

    pub fn application_id_for_pair(
        &self,
        campaign_id: &str,
        influencer_id: &str,
    ) -> Result<Option<String>, WorkflowError> {
        let key = pair_key(campaign_id, influencer_id);
        Ok(self
            .db
            .get(key.as_bytes())?
            .map(|bytes| String::from_utf8_lossy(&bytes).to_string()))
    }

    pub fn applications(&self) -> Result<Vec<Application>, WorkflowError> {
        self.scan("app_")
    }

    pub fn submissions(&self) -> Result<Vec<Submission>, WorkflowError> {
        self.scan("sub_")
    }

    fn scan<T>(&self, prefix: &str) -> Result<Vec<T>, WorkflowError>
    where
        T: for<'b> minicbor::Decode<'b, ()>,
    {
        let mut rows = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = entry?;
            rows.push(dec(&bytes)?);
        }
        Ok(rows)
    }

    pub fn conversation(&self, application_id: &str) -> Result<Option<Conversation>, WorkflowError> {
        self.fetch(&conversation_key(application_id))
    }

    /// Messages in `created_at` order. uuid7 message keys already sort by
    /// time, the explicit sort covers clock skew between writers.
    pub fn messages(&self, conversation_id: &str) -> Result<Vec<Message>, WorkflowError> {
        let prefix = format!("msgs_{conversation_id}:");
        let mut messages: Vec<Message> = self.scan(&prefix)?;
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(messages)
    }

    /// Atomic counter bump at the storage layer; never read-modify-write in
    /// application code.
    pub fn increment(&self, key: &str) -> Result<u64, WorkflowError> {
        let updated = self.db.update_and_fetch(key.as_bytes(), |old| {
            let current = old.map(read_u64).unwrap_or(0);
            Some(current.saturating_add(1).to_be_bytes().to_vec())
        })?;
        Ok(updated.map(|bytes| read_u64(&bytes)).unwrap_or(0))
    }

    pub fn decrement(&self, key: &str) -> Result<u64, WorkflowError> {
        let updated = self.db.update_and_fetch(key.as_bytes(), |old| {
            let current = old.map(read_u64).unwrap_or(0);
            Some(current.saturating_sub(1).to_be_bytes().to_vec())
        })?;
        Ok(updated.map(|bytes| read_u64(&bytes)).unwrap_or(0))
    }

    pub fn counter(&self, key: &str) -> Result<u64, WorkflowError> {
        Ok(self
            .db
            .get(key.as_bytes())?
            .map(|bytes| read_u64(&bytes))
            .unwrap_or(0))
    }

    /// Serialized unit of work. Abort reasons surface as the domain error.
    pub(crate) fn transaction<T, F>(&self, f: F) -> Result<T, WorkflowError>
    where
        F: Fn(&TransactionalTree) -> ConflictableTransactionResult<T, WorkflowError>,
    {
        match self.db.transaction(f) {
            Ok(value) => Ok(value),
            Err(TransactionError::Abort(e)) => Err(e),
            Err(TransactionError::Storage(e)) => Err(WorkflowError::Storage(e)),
        }
    }
}

pub(crate) fn pair_key(campaign_id: &str, influencer_id: &str) -> String {
    format!("pair_{campaign_id}:{influencer_id}")
}

pub(crate) fn balance_key(influencer_id: &str) -> String {
    format!("bal_{influencer_id}")
}

pub(crate) fn conversation_key(application_id: &str) -> String {
    format!("cnv_{application_id}")
}

pub(crate) fn message_key(conversation_id: &str, message_id: &str) -> String {
    format!("msgs_{conversation_id}:{message_id}")
}

pub(crate) fn effect_key(entity_id: &str, status: &Status) -> String {
    format!("fx_{}", sha256::digest(format!("{entity_id}:{status}")))
}

pub(crate) fn views_key(campaign_id: &str) -> String {
    format!("views_{campaign_id}")
}

pub(crate) fn favs_key(campaign_id: &str) -> String {
    format!("favs_{campaign_id}")
}

pub(crate) fn enc<T: minicbor::Encode<()>>(value: &T) -> Result<Vec<u8>, WorkflowError> {
    minicbor::to_vec(value).map_err(|e| WorkflowError::Codec(e.to_string()))
}

pub(crate) fn dec<T>(bytes: &[u8]) -> Result<T, WorkflowError>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(bytes).map_err(|e| WorkflowError::Codec(e.to_string()))
}

pub(crate) fn abort(e: WorkflowError) -> ConflictableTransactionError<WorkflowError> {
    ConflictableTransactionError::Abort(e)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let len = bytes.len().min(8);
    buf[8 - len..].copy_from_slice(&bytes[..len]);
    u64::from_be_bytes(buf)
}
