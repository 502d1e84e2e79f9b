//! Length-prefixed `bincode` framing over a `TcpStream`, plus small
//! connect/bind-with-retry helpers used by both binaries since replicas
//! and clients alike may race another process's listener coming up.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::rpc::{Request, Response};
use crate::ChatError;

const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

pub async fn write_frame<T: serde::Serialize>(
    stream: &mut TcpStream,
    value: &T,
) -> Result<(), ChatError> {
    let bytes = bincode::serialize(value).map_err(ChatError::from)?;
    let len = bytes.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

pub async fn read_frame<T: serde::de::DeserializeOwned>(
    stream: &mut TcpStream,
) -> Result<T, ChatError> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_LEN {
        return Err(ChatError::Codec(format!(
            "frame of {} bytes exceeds max of {}",
            len, MAX_FRAME_LEN
        )));
    }
    let mut buf = vec![0u8; len as usize];
    stream.read_exact(&mut buf).await?;
    bincode::deserialize(&buf).map_err(ChatError::from)
}

/// Sends one request and waits for the matching response, enforcing
/// `timeout` across connect + round trip.
pub async fn call(
    address: &str,
    request: &Request,
    timeout: Duration,
) -> Result<Response, ChatError> {
    tokio::time::timeout(timeout, async {
        let mut stream = TcpStream::connect(address).await?;
        write_frame(&mut stream, request).await?;
        read_frame::<Response>(&mut stream).await
    })
    .await
    .map_err(ChatError::from)?
}

/// Binds a listener, retrying on `AddrInUse` up to `attempts` times -- a
/// just-restarted replica's old listener may take a moment to release the
/// port.
pub async fn bind_with_retry(
    address: &str,
    attempts: u32,
    delay: Duration,
) -> Result<TcpListener, ChatError> {
    let mut last_err = None;
    for attempt in 0..attempts {
        match TcpListener::bind(address).await {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse && attempt + 1 < attempts => {
                last_err = Some(e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(ChatError::from(e)),
        }
    }
    Err(ChatError::from(last_err.expect("attempts > 0")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frame_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let req: Request = read_frame(&mut stream).await.unwrap();
            match req {
                Request::GetLeaderInfo => {
                    write_frame(
                        &mut stream,
                        &Response::LeaderInfo {
                            leader_address: Some("127.0.0.1:1".into()),
                            replica_addresses: vec![],
                        },
                    )
                    .await
                    .unwrap();
                }
                _ => panic!("unexpected request"),
            }
        });

        let resp = call(
            &addr.to_string(),
            &Request::GetLeaderInfo,
            Duration::from_secs(2),
        )
        .await
        .unwrap();
        match resp {
            Response::LeaderInfo { leader_address, .. } => {
                assert_eq!(leader_address, Some("127.0.0.1:1".into()))
            }
            other => panic!("unexpected response: {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn call_times_out_against_nothing_listening() {
        // port 1 is a privileged, essentially-never-bound port in CI
        let result = call("127.0.0.1:1", &Request::GetLeaderInfo, Duration::from_millis(200)).await;
        assert!(result.is_err());
    }
}
