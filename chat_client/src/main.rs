//! Client executable: a minimal line-oriented REPL driving the chat
//! client runtime. Replaces the reference implementation's Tkinter GUI,
//! which is out of scope for this crate.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use quorumchat::logging::{logger_init, set_identity};
use quorumchat::rpc::{Request, Response};
use quorumchat::{pf_error, ChatClient, ClientConfig, InitError};

#[derive(Parser, Debug)]
#[command(name = "chat_client", about = "Replicated chat service client")]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Initial replica address to try, e.g. 127.0.0.1:50051.
    #[arg(long)]
    connect: Option<String>,
}

fn print_help() {
    println!(
        "commands:\n\
         \x20 create <user> <pass>\n\
         \x20 login <user> <pass>\n\
         \x20 list [pattern]\n\
         \x20 send <user> <recipient> <message...>\n\
         \x20 read <user>\n\
         \x20 history <user>\n\
         \x20 delete <user> <id|-1>\n\
         \x20 deleteaccount <user>\n\
         \x20 quit"
    );
}

fn print_response(resp: &Response) {
    match resp {
        Response::Ok => println!("ok"),
        Response::Error(msg) => println!("error: {}", msg),
        Response::NotLeader { leader_address } => {
            println!("not leader (believed leader: {:?})", leader_address)
        }
        Response::LoginOk { message, unread_count } => {
            println!("{} ({} unread)", message, unread_count)
        }
        Response::Accounts(names) => {
            for name in names {
                println!("{}", name);
            }
        }
        Response::Messages(messages) => {
            for m in messages {
                println!("[{}] {} -> {}: {}", m.timestamp, m.sender, m.recipient, m.body);
            }
        }
        Response::LeaderInfo { leader_address, .. } => {
            println!("leader: {:?}", leader_address)
        }
        Response::ElectionAck { .. } | Response::JoinAccepted { .. } => {
            println!("unexpected internal response at client")
        }
    }
}

async fn dispatch_line(client: &ChatClient, line: &str) -> Option<()> {
    let parts: Vec<&str> = line.trim().splitn(4, ' ').collect();
    let result = match parts.as_slice() {
        ["create", user, pass] => {
            client
                .call(Request::CreateAccount { username: user.to_string(), password: pass.to_string() })
                .await
        }
        ["login", user, pass] => {
            client
                .call_any_replica(Request::Login { username: user.to_string(), password: pass.to_string() })
                .await
        }
        ["list"] => client.call_any_replica(Request::ListAccounts { pattern: String::new() }).await,
        ["list", pattern] => {
            client.call_any_replica(Request::ListAccounts { pattern: pattern.to_string() }).await
        }
        ["send", user, recipient, body] => {
            client
                .call(Request::SendMessage {
                    sender: user.to_string(),
                    recipient: recipient.to_string(),
                    body: body.to_string(),
                })
                .await
        }
        ["read", user] => client.call(Request::ReadNewMessages { username: user.to_string() }).await,
        ["history", user] => {
            client.call_any_replica(Request::ListMessages { username: user.to_string() }).await
        }
        ["delete", user, id] => match id.parse::<i64>() {
            Ok(id) => client.call(Request::DeleteMessages { username: user.to_string(), id }).await,
            Err(_) => {
                println!("id must be an integer (-1 for all)");
                return Some(());
            }
        },
        ["deleteaccount", user] => {
            client.call(Request::DeleteAccount { username: user.to_string() }).await
        }
        ["quit"] | ["exit"] => return None,
        ["help"] | [] => {
            print_help();
            return Some(());
        }
        _ => {
            println!("unrecognized command, type 'help'");
            return Some(());
        }
    };
    match result {
        Ok(resp) => print_response(&resp),
        Err(e) => println!("error: {}", e),
    }
    Some(())
}

async fn run() -> Result<(), InitError> {
    let cli = Cli::parse();
    let config_str = match &cli.config {
        Some(path) => Some(std::fs::read_to_string(path)?),
        None => None,
    };
    let mut config = ClientConfig::parse(config_str.as_deref())?;
    if let Some(connect) = cli.connect {
        if let Some((host, port)) = connect.rsplit_once(':') {
            config.client_connect_host = host.to_string();
            config.client_connect_port = port.parse().unwrap_or(config.client_connect_port);
        }
    }

    set_identity("client");
    let client = ChatClient::new(config);

    print_help();
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        print!("> ");
        io::stdout().flush().ok();
        let line = line?;
        if dispatch_line(&client, &line).await.is_none() {
            break;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    logger_init();
    if let Err(e) = run().await {
        pf_error!("fatal: {}", e);
        std::process::exit(1);
    }
}
