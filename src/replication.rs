//! The replicated write log's record format and follower-side applier.
//!
//! Every mutating chat operation accepted by the leader is turned into one
//! `ReplicationRecord`, fanned out to followers (see [`crate::fanout`]),
//! and applied locally by both the leader (before replying to the client)
//! and every follower that receives it. Applying a record is idempotent
//! where the underlying store operation already is (message ids, deletes);
//! account creation/deletion are not retried by the leader once committed
//! locally, so followers only ever see each record once in practice.

use serde::{Deserialize, Serialize};

use crate::model::{Account, Message};
use crate::store::Store;
use crate::ChatError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReplicationRecord {
    CreateAccount(Account),
    SendMessage(Message),
    DeleteMessages { recipient: String, ids: Vec<u64> },
    DeleteAccount { username: String },
}

/// Applies a record produced elsewhere (by this replica while leader, or
/// received over the wire while a follower) to the local store.
pub async fn apply(store: &Store, record: &ReplicationRecord) -> Result<(), ChatError> {
    match record {
        ReplicationRecord::CreateAccount(account) => {
            if !store.account_exists(&account.username).await {
                store.insert_account(account.clone()).await?;
            }
            Ok(())
        }
        ReplicationRecord::SendMessage(message) => {
            store.apply_replicated_message(message.clone()).await
        }
        ReplicationRecord::DeleteMessages { recipient, ids } => {
            store.apply_deletes(recipient, ids).await
        }
        ReplicationRecord::DeleteAccount { username } => {
            if store.account_exists(username).await {
                store.delete_account(username).await?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::fs;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "quorumchat-repl-test-{}-{}.db",
            name,
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn apply_create_account_is_idempotent() {
        let path = tmp_path("create");
        let store = Store::open(&path).await.unwrap();
        let record = ReplicationRecord::CreateAccount(Account {
            username: "alice".into(),
            password: "pw".into(),
        });
        apply(&store, &record).await.unwrap();
        apply(&store, &record).await.unwrap();
        assert!(store.account_exists("alice").await);
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn apply_send_message_preserves_id() {
        let path = tmp_path("send");
        let store = Store::open(&path).await.unwrap();
        let msg = Message {
            id: 7,
            sender: "a".into(),
            recipient: "b".into(),
            body: "hi".into(),
            read: false,
            timestamp: "t".into(),
        };
        apply(&store, &ReplicationRecord::SendMessage(msg.clone()))
            .await
            .unwrap();
        let all = store.all_for("b").await;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, 7);
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn apply_delete_account_cascades() {
        let path = tmp_path("delacct");
        let store = Store::open(&path).await.unwrap();
        store
            .insert_account(Account {
                username: "bob".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();
        apply(
            &store,
            &ReplicationRecord::DeleteAccount {
                username: "bob".into(),
            },
        )
        .await
        .unwrap();
        assert!(!store.account_exists("bob").await);
        let _ = fs::remove_file(&path).await;
    }
}
