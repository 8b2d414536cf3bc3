//! Single-use challenge transactions.
//!
//! A transaction is created when phase one issues a challenge and is removed
//! when phase two exits, whatever the outcome. The store itself holds no state:
//! every operation works on the session the host passes in, so transactions of
//! different attempts are never visible to each other.

use crate::session::SessionState;
use crate::types::Scheme;
use crate::verifier::AttestationError;
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A pending challenge bound to one authentication attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Random v4 UUID; doubles as the challenge/nonce sent to the client
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub consumed: bool,
}

impl Transaction {
    /// The challenge value bound to this transaction.
    pub fn challenge(&self) -> &str {
        &self.id
    }
}

/// Issues, reads and discards the transaction of one scheme in a session.
#[derive(Debug, Clone)]
pub struct TransactionStore {
    scheme: Scheme,
    ttl: Duration,
}

impl TransactionStore {
    pub fn new(scheme: Scheme, ttl: Duration) -> Self {
        Self { scheme, ttl }
    }

    /// Issue a fresh challenge, replacing any transaction left in the session.
    pub fn issue(&self, session: &mut dyn SessionState) -> Result<Transaction, AttestationError> {
        self.issue_at(session, Utc::now())
    }

    pub fn issue_at(
        &self,
        session: &mut dyn SessionState,
        now: DateTime<Utc>,
    ) -> Result<Transaction, AttestationError> {
        let transaction = Transaction {
            id: generate_id(),
            created_at: now,
            consumed: false,
        };

        let record = serde_json::to_string(&transaction)
            .map_err(|e| AttestationError::Protocol(format!("cannot store transaction: {}", e)))?;
        session.put(self.scheme.session_key(), record);

        tracing::debug!(scheme = %self.scheme, "Issued challenge transaction");
        Ok(transaction)
    }

    /// Read the pending transaction without consuming it.
    pub fn peek(&self, session: &dyn SessionState) -> Result<Transaction, AttestationError> {
        self.peek_at(session, Utc::now())
    }

    pub fn peek_at(
        &self,
        session: &dyn SessionState,
        now: DateTime<Utc>,
    ) -> Result<Transaction, AttestationError> {
        let record = session.get(self.scheme.session_key()).ok_or_else(|| {
            AttestationError::Protocol(format!("no pending {} transaction", self.scheme))
        })?;

        let transaction: Transaction = serde_json::from_str(&record)
            .map_err(|e| AttestationError::Protocol(format!("corrupt transaction record: {}", e)))?;

        if transaction.consumed {
            return Err(AttestationError::Protocol(
                "transaction already consumed".to_string(),
            ));
        }

        // Negative age (host clock skew) counts as fresh.
        let age = (now - transaction.created_at).to_std().unwrap_or_default();
        if age > self.ttl {
            return Err(AttestationError::Protocol(format!(
                "challenge expired after {}s",
                age.as_secs()
            )));
        }

        Ok(transaction)
    }

    /// Discard the pending transaction and return it marked consumed.
    ///
    /// Calling this again is a no-op returning `None`. A consumed record the
    /// host writes back into the session is still rejected by `peek`.
    pub fn consume(&self, session: &mut dyn SessionState) -> Option<Transaction> {
        let key = self.scheme.session_key();
        let record = session.get(key)?;
        session.remove(key);
        tracing::debug!(scheme = %self.scheme, "Consumed challenge transaction");

        let mut transaction: Transaction = serde_json::from_str(&record).ok()?;
        transaction.consumed = true;
        Some(transaction)
    }
}

/// 122 bits of OS entropy, formatted as a v4 UUID.
fn generate_id() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySession;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn store() -> TransactionStore {
        TransactionStore::new(Scheme::AppAttest, Duration::from_secs(300))
    }

    #[test]
    fn test_issue_then_peek() {
        let mut session = MemorySession::new();
        let issued = store().issue(&mut session).unwrap();

        assert!(!issued.consumed);
        assert_eq!(uuid::Uuid::parse_str(&issued.id).unwrap().get_version_num(), 4);

        let peeked = store().peek(&session).unwrap();
        assert_eq!(peeked, issued);
        assert_eq!(peeked.challenge(), issued.id);
    }

    #[test]
    fn test_peek_without_issue() {
        let session = MemorySession::new();
        assert!(matches!(
            store().peek(&session),
            Err(AttestationError::Protocol(_))
        ));
    }

    #[test]
    fn test_consume_removes_transaction() {
        let mut session = MemorySession::new();
        store().issue(&mut session).unwrap();

        store().consume(&mut session);
        assert!(session.is_empty());
        assert!(store().peek(&session).is_err());
    }

    #[test]
    fn test_expired_challenge() {
        let mut session = MemorySession::new();
        let issued_at = Utc::now();
        store().issue_at(&mut session, issued_at).unwrap();

        let later = issued_at + chrono::Duration::seconds(301);
        assert!(matches!(
            store().peek_at(&session, later),
            Err(AttestationError::Protocol(_))
        ));
        assert!(store()
            .peek_at(&session, issued_at + chrono::Duration::seconds(299))
            .is_ok());
    }

    #[test]
    fn test_consume_marks_transaction() {
        let mut session = MemorySession::new();
        let issued = store().issue(&mut session).unwrap();

        let consumed = store().consume(&mut session).unwrap();
        assert!(consumed.consumed);
        assert_eq!(consumed.id, issued.id);
        assert!(store().consume(&mut session).is_none());
    }

    #[test]
    fn test_consumed_record_written_back_is_rejected() {
        let mut session = MemorySession::new();
        store().issue(&mut session).unwrap();
        let consumed = store().consume(&mut session).unwrap();

        session.put(
            Scheme::AppAttest.session_key(),
            serde_json::to_string(&consumed).unwrap(),
        );
        assert!(matches!(
            store().peek(&session),
            Err(AttestationError::Protocol(_))
        ));
    }

    #[test]
    fn test_schemes_do_not_share_transactions() {
        let mut session = MemorySession::new();
        store().issue(&mut session).unwrap();

        let google = TransactionStore::new(Scheme::PlayIntegrity, Duration::from_secs(300));
        assert!(google.peek(&session).is_err());
    }

    #[test]
    fn test_ids_are_unique() {
        let mut session = MemorySession::new();
        let ids: HashSet<String> = (0..1000)
            .map(|_| store().issue(&mut session).unwrap().id)
            .collect();
        assert_eq!(ids.len(), 1000);
    }

    proptest! {
        #[test]
        fn prop_consume_is_idempotent(times in 1usize..5, issue_first in any::<bool>()) {
            let mut session = MemorySession::new();
            session.put("host.other", "kept".to_string());
            if issue_first {
                store().issue(&mut session).unwrap();
            }

            for _ in 0..times {
                store().consume(&mut session);
            }

            prop_assert!(store().peek(&session).is_err());
            prop_assert_eq!(session.len(), 1);
            let other = session.get("host.other");
            prop_assert_eq!(other.as_deref(), Some("kept"));
        }
    }
}
