//! The persistent store: an in-process, mutex-guarded pair of tables
//! (accounts, messages) that is fsynced to a single file on every mutating
//! call. No SQL engine is involved -- the whole file is just a
//! `bincode`-encoded snapshot of `StoreState`, rewritten atomically via a
//! temp-file-then-rename so a crash mid-write can never leave a half
//! written database on disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::Mutex;

use crate::model::{Account, Message};
use crate::ChatError;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreState {
    accounts: BTreeMap<String, Account>,
    messages: BTreeMap<u64, Message>,
    next_id: u64,
}

/// Owns the in-memory tables and the path they're persisted to.
pub struct Store {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl Store {
    /// Opens (or creates) the store backed by `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, ChatError> {
        let path = path.as_ref().to_path_buf();
        let state = match fs::read(&path).await {
            Ok(bytes) if !bytes.is_empty() => {
                bincode::deserialize(&bytes).map_err(ChatError::from)?
            }
            _ => StoreState::default(),
        };
        Ok(Store {
            path,
            state: Mutex::new(state),
        })
    }

    async fn persist(&self, state: &StoreState) -> Result<(), ChatError> {
        let bytes = bincode::serialize(state).map_err(ChatError::from)?;
        let tmp = self.path.with_extension("db.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    pub async fn account_exists(&self, username: &str) -> bool {
        self.state.lock().await.accounts.contains_key(username)
    }

    pub async fn get_account(&self, username: &str) -> Option<Account> {
        self.state.lock().await.accounts.get(username).cloned()
    }

    pub async fn insert_account(&self, account: Account) -> Result<(), ChatError> {
        let mut guard = self.state.lock().await;
        if guard.accounts.contains_key(&account.username) {
            return Err(ChatError::Store(format!(
                "account '{}' already exists",
                account.username
            )));
        }
        guard.accounts.insert(account.username.clone(), account);
        self.persist(&guard).await
    }

    /// Accounts whose username contains `pattern` as a substring (SQL-style
    /// `LIKE '%pattern%'`; an empty pattern matches everything), excluding
    /// `exclude_username` itself, sorted for deterministic listing.
    pub async fn list_accounts_matching(
        &self,
        pattern: &str,
        exclude_username: &str,
    ) -> Vec<String> {
        let guard = self.state.lock().await;
        let mut names: Vec<String> = guard
            .accounts
            .keys()
            .filter(|u| u.as_str() != exclude_username)
            .filter(|u| pattern.is_empty() || u.contains(pattern))
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub async fn delete_account(&self, username: &str) -> Result<(), ChatError> {
        let mut guard = self.state.lock().await;
        if guard.accounts.remove(username).is_none() {
            return Err(ChatError::Store(format!(
                "account '{}' does not exist",
                username
            )));
        }
        // only messages addressed *to* this account are cascade-deleted;
        // messages it sent to others stay in the recipient's mailbox
        guard.messages.retain(|_, m| m.recipient != username);
        self.persist(&guard).await
    }

    /// Inserts a message, assigning it the next locally-available id.
    /// Message ids are a purely local sequence: a replica assigns its own
    /// id rather than replicating the leader's, so ids are not guaranteed
    /// to agree across replicas.
    pub async fn insert_message(
        &self,
        sender: String,
        recipient: String,
        body: String,
        timestamp: String,
    ) -> Result<Message, ChatError> {
        let mut guard = self.state.lock().await;
        let id = guard.next_id;
        guard.next_id += 1;
        let msg = Message {
            id,
            sender,
            recipient,
            body,
            read: false,
            timestamp,
        };
        guard.messages.insert(id, msg.clone());
        self.persist(&guard).await?;
        Ok(msg)
    }

    /// Inserts a message carrying an externally-assigned id, used when
    /// applying a replicated record so accepted ids need not be
    /// renumbered. If the id is already taken locally it is skipped
    /// rather than overwritten.
    pub async fn apply_replicated_message(&self, msg: Message) -> Result<(), ChatError> {
        let mut guard = self.state.lock().await;
        if guard.messages.contains_key(&msg.id) {
            return Ok(());
        }
        if msg.id >= guard.next_id {
            guard.next_id = msg.id + 1;
        }
        guard.messages.insert(msg.id, msg);
        self.persist(&guard).await
    }

    /// Unread messages addressed to `recipient`, oldest first, marking
    /// them read as they are fetched.
    pub async fn take_unread(&self, recipient: &str) -> Result<Vec<Message>, ChatError> {
        let mut guard = self.state.lock().await;
        let mut out: Vec<Message> = guard
            .messages
            .values()
            .filter(|m| m.recipient == recipient && !m.read)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.id);
        for m in &out {
            if let Some(stored) = guard.messages.get_mut(&m.id) {
                stored.read = true;
            }
        }
        self.persist(&guard).await?;
        Ok(out)
    }

    /// Count of unread messages addressed to `recipient`, without
    /// consuming them (unlike `take_unread`).
    pub async fn count_unread(&self, recipient: &str) -> u64 {
        let guard = self.state.lock().await;
        guard
            .messages
            .values()
            .filter(|m| m.recipient == recipient && !m.read)
            .count() as u64
    }

    /// All messages addressed to `recipient` (read and unread), oldest
    /// first.
    pub async fn all_for(&self, recipient: &str) -> Vec<Message> {
        let guard = self.state.lock().await;
        let mut out: Vec<Message> = guard
            .messages
            .values()
            .filter(|m| m.recipient == recipient)
            .cloned()
            .collect();
        out.sort_by_key(|m| m.id);
        out
    }

    /// Deletes one message addressed to `recipient` by id, or -- when
    /// `id` is `-1` -- every message addressed to `recipient`. Returns
    /// the ids actually removed, so the caller can replicate them.
    pub async fn delete_messages(
        &self,
        recipient: &str,
        id: i64,
    ) -> Result<Vec<u64>, ChatError> {
        let mut guard = self.state.lock().await;
        let removed: Vec<u64> = if id < 0 {
            guard
                .messages
                .values()
                .filter(|m| m.recipient == recipient)
                .map(|m| m.id)
                .collect()
        } else {
            let id = id as u64;
            match guard.messages.get(&id) {
                Some(m) if m.recipient == recipient => vec![id],
                Some(_) => {
                    return Err(ChatError::Store(format!(
                        "message {} does not belong to '{}'",
                        id, recipient
                    )))
                }
                None => {
                    return Err(ChatError::Store(format!("message {} not found", id)))
                }
            }
        };
        for id in &removed {
            guard.messages.remove(id);
        }
        self.persist(&guard).await?;
        Ok(removed)
    }

    /// Applies a replicated delete: removes exactly the given ids if
    /// still addressed to `recipient`, silently skipping ids already
    /// absent (follower ran ahead, or the delete raced a cascade).
    pub async fn apply_deletes(&self, recipient: &str, ids: &[u64]) -> Result<(), ChatError> {
        let mut guard = self.state.lock().await;
        for id in ids {
            if let Some(m) = guard.messages.get(id) {
                if m.recipient == recipient {
                    guard.messages.remove(id);
                }
            }
        }
        self.persist(&guard).await
    }

    /// Full snapshot for state transfer to a joining replica.
    pub async fn snapshot(&self) -> (Vec<Account>, Vec<Message>, u64) {
        let guard = self.state.lock().await;
        (
            guard.accounts.values().cloned().collect(),
            guard.messages.values().cloned().collect(),
            guard.next_id,
        )
    }

    /// Replaces the whole local state with a snapshot received from the
    /// cluster's current leader. Used exactly once, by a joining replica.
    pub async fn install_snapshot(
        &self,
        accounts: Vec<Account>,
        messages: Vec<Message>,
        next_id: u64,
    ) -> Result<(), ChatError> {
        let mut guard = self.state.lock().await;
        guard.accounts = accounts
            .into_iter()
            .map(|a| (a.username.clone(), a))
            .collect();
        guard.messages = messages.into_iter().map(|m| (m.id, m)).collect();
        guard.next_id = next_id;
        self.persist(&guard).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("quorumchat-store-test-{}-{}.db", name, std::process::id()))
    }

    #[tokio::test]
    async fn insert_and_fetch_account() {
        let path = tmp_path("acct");
        let store = Store::open(&path).await.unwrap();
        store
            .insert_account(Account {
                username: "alice".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();
        assert!(store.account_exists("alice").await);
        assert!(store
            .insert_account(Account {
                username: "alice".into(),
                password: "other".into(),
            })
            .await
            .is_err());
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn delete_account_cascades_messages() {
        let path = tmp_path("cascade");
        let store = Store::open(&path).await.unwrap();
        store
            .insert_account(Account {
                username: "bob".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();
        store
            .insert_message("alice".into(), "bob".into(), "hi".into(), "07/28 10:00".into())
            .await
            .unwrap();
        // a message bob *sent* to someone else should survive bob's deletion
        store
            .insert_message("bob".into(), "carol".into(), "bye".into(), "07/28 10:01".into())
            .await
            .unwrap();
        store.delete_account("bob").await.unwrap();
        assert!(store.all_for("bob").await.is_empty());
        assert_eq!(store.all_for("carol").await.len(), 1);
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn take_unread_marks_read_once() {
        let path = tmp_path("unread");
        let store = Store::open(&path).await.unwrap();
        store
            .insert_message("a".into(), "b".into(), "hi".into(), "t".into())
            .await
            .unwrap();
        let first = store.take_unread("b").await.unwrap();
        assert_eq!(first.len(), 1);
        let second = store.take_unread("b").await.unwrap();
        assert!(second.is_empty());
        assert_eq!(store.all_for("b").await.len(), 1);
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn delete_messages_minus_one_clears_mailbox() {
        let path = tmp_path("delall");
        let store = Store::open(&path).await.unwrap();
        for _ in 0..3 {
            store
                .insert_message("a".into(), "b".into(), "hi".into(), "t".into())
                .await
                .unwrap();
        }
        let removed = store.delete_messages("b", -1).await.unwrap();
        assert_eq!(removed.len(), 3);
        assert!(store.all_for("b").await.is_empty());
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn delete_message_rejects_wrong_owner() {
        let path = tmp_path("wrongowner");
        let store = Store::open(&path).await.unwrap();
        let msg = store
            .insert_message("a".into(), "b".into(), "hi".into(), "t".into())
            .await
            .unwrap();
        assert!(store.delete_messages("someone_else", msg.id as i64).await.is_err());
        let _ = fs::remove_file(&path).await;
    }

    #[test]
    async fn list_accounts_matching_is_substring_search() {
        let path = tmp_path("substr");
        let store = Store::open(&path).await.unwrap();
        store
            .insert_account(Account { username: "alice".into(), password: "pw".into() })
            .await
            .unwrap();
        store
            .insert_account(Account { username: "bob".into(), password: "pw".into() })
            .await
            .unwrap();
        let matches = store.list_accounts_matching("li", "").await;
        assert_eq!(matches, vec!["alice".to_string()]);
        assert!(store.list_accounts_matching("zzz", "").await.is_empty());
        let all = store.list_accounts_matching("", "").await;
        assert_eq!(all, vec!["alice".to_string(), "bob".to_string()]);
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn snapshot_round_trips() {
        let path = tmp_path("snap");
        let store = Store::open(&path).await.unwrap();
        store
            .insert_account(Account {
                username: "alice".into(),
                password: "pw".into(),
            })
            .await
            .unwrap();
        store
            .insert_message("alice".into(), "alice".into(), "note".into(), "t".into())
            .await
            .unwrap();
        let (accounts, messages, next_id) = store.snapshot().await;

        let path2 = tmp_path("snap-target");
        let store2 = Store::open(&path2).await.unwrap();
        store2
            .install_snapshot(accounts, messages, next_id)
            .await
            .unwrap();
        assert!(store2.account_exists("alice").await);
        assert_eq!(store2.all_for("alice").await.len(), 1);
        let _ = fs::remove_file(&path).await;
        let _ = fs::remove_file(&path2).await;
    }
}
