//! The eight client-facing chat operations, implemented against a `Store`
//! plus whatever replication a caller wants layered on top. Kept free of
//! any networking or leader/follower concerns so the leader-side RPC
//! handlers in [`crate::server`] can call straight through after deciding
//! a request is theirs to serve, and so these are unit-testable without a
//! running cluster.

use chrono::Local;

use crate::model::{Account, Message};
use crate::replication::ReplicationRecord;
use crate::store::Store;
use crate::ChatError;

pub fn now_timestamp() -> String {
    Local::now().format("%m/%d %H:%M").to_string()
}

pub async fn create_account(
    store: &Store,
    username: String,
    password: String,
) -> Result<ReplicationRecord, ChatError> {
    if username.trim().is_empty() {
        return Err(ChatError::Invalid("username must not be empty".into()));
    }
    let account = Account { username, password };
    store.insert_account(account.clone()).await?;
    Ok(ReplicationRecord::CreateAccount(account))
}

/// Verifies the given credentials and, on success, returns the number of
/// unread messages waiting for this account.
pub async fn login(store: &Store, username: &str, password: &str) -> Result<u64, ChatError> {
    match store.get_account(username).await {
        Some(account) if account.password == password => Ok(store.count_unread(username).await),
        Some(_) => Err(ChatError::Invalid("incorrect password".into())),
        None => Err(ChatError::Invalid(format!(
            "account '{}' does not exist",
            username
        ))),
    }
}

pub async fn list_accounts(
    store: &Store,
    pattern: &str,
    requesting_user: &str,
) -> Vec<String> {
    store.list_accounts_matching(pattern, requesting_user).await
}

/// Sends a message, first checking the recipient exists -- this replica
/// rejects `SendMessage` to an unknown recipient, matching the reference
/// client/server pair's expected behavior for that case.
pub async fn send_message(
    store: &Store,
    sender: String,
    recipient: String,
    body: String,
) -> Result<(Message, ReplicationRecord), ChatError> {
    if !store.account_exists(&recipient).await {
        return Err(ChatError::Invalid(format!(
            "recipient '{}' does not exist",
            recipient
        )));
    }
    let msg = store
        .insert_message(sender, recipient, body, now_timestamp())
        .await?;
    Ok((msg.clone(), ReplicationRecord::SendMessage(msg)))
}

/// Drains and marks-read every undelivered message for `username`. Not
/// replicated: which messages have been "seen" is allowed to diverge
/// across replicas, since it reflects a client's delivery progress rather
/// than shared chat state.
pub async fn read_new_messages(store: &Store, username: &str) -> Result<Vec<Message>, ChatError> {
    store.take_unread(username).await
}

pub async fn list_messages(store: &Store, username: &str) -> Vec<Message> {
    store.all_for(username).await
}

/// Deletes one message (`id >= 0`) or every message (`id == -1`)
/// addressed to `username`.
pub async fn delete_messages(
    store: &Store,
    username: String,
    id: i64,
) -> Result<ReplicationRecord, ChatError> {
    let removed = store.delete_messages(&username, id).await?;
    Ok(ReplicationRecord::DeleteMessages {
        recipient: username,
        ids: removed,
    })
}

pub async fn delete_account(
    store: &Store,
    username: String,
) -> Result<ReplicationRecord, ChatError> {
    store.delete_account(&username).await?;
    Ok(ReplicationRecord::DeleteAccount { username })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tokio::fs;

    fn tmp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "quorumchat-chatops-test-{}-{}.db",
            name,
            std::process::id()
        ))
    }

    #[tokio::test]
    async fn create_then_login() {
        let path = tmp_path("login");
        let store = Store::open(&path).await.unwrap();
        create_account(&store, "alice".into(), "pw".into()).await.unwrap();
        assert_eq!(login(&store, "alice", "pw").await.unwrap(), 0);
        assert!(login(&store, "alice", "wrong").await.is_err());
        assert!(login(&store, "nobody", "pw").await.is_err());
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn login_reports_unread_count() {
        let path = tmp_path("login-unread");
        let store = Store::open(&path).await.unwrap();
        create_account(&store, "alice".into(), "pw".into()).await.unwrap();
        store.insert_message("bob".into(), "alice".into(), "hi".into(), "t".into()).await.unwrap();
        store.insert_message("bob".into(), "alice".into(), "hi2".into(), "t".into()).await.unwrap();
        assert_eq!(login(&store, "alice", "pw").await.unwrap(), 2);
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn send_message_rejects_nonexistent_recipient() {
        let path = tmp_path("sendreject");
        let store = Store::open(&path).await.unwrap();
        create_account(&store, "alice".into(), "pw".into()).await.unwrap();
        let result = send_message(&store, "alice".into(), "ghost".into(), "hi".into()).await;
        assert!(result.is_err());
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn send_message_to_existing_recipient_succeeds() {
        let path = tmp_path("sendok");
        let store = Store::open(&path).await.unwrap();
        create_account(&store, "alice".into(), "pw".into()).await.unwrap();
        create_account(&store, "bob".into(), "pw".into()).await.unwrap();
        let (msg, record) =
            send_message(&store, "alice".into(), "bob".into(), "hi".into()).await.unwrap();
        assert_eq!(msg.recipient, "bob");
        matches!(record, ReplicationRecord::SendMessage(_));
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn list_accounts_excludes_requester_and_matches_pattern() {
        let path = tmp_path("list");
        let store = Store::open(&path).await.unwrap();
        create_account(&store, "alice".into(), "pw".into()).await.unwrap();
        create_account(&store, "alan".into(), "pw".into()).await.unwrap();
        create_account(&store, "bob".into(), "pw".into()).await.unwrap();
        // substring match: "al" also matches "alice" itself, but alice is
        // excluded as the requester
        let matches = list_accounts(&store, "al", "alice").await;
        assert_eq!(matches, vec!["alan".to_string()]);
        let _ = fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn delete_messages_negative_one_deletes_all() {
        let path = tmp_path("delall");
        let store = Store::open(&path).await.unwrap();
        create_account(&store, "bob".into(), "pw".into()).await.unwrap();
        store.insert_message("a".into(), "bob".into(), "1".into(), "t".into()).await.unwrap();
        store.insert_message("a".into(), "bob".into(), "2".into(), "t".into()).await.unwrap();
        delete_messages(&store, "bob".into(), -1).await.unwrap();
        assert!(list_messages(&store, "bob").await.is_empty());
        let _ = fs::remove_file(&path).await;
    }
}
