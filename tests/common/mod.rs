#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};
use tantivy::schema::{Schema, INDEXED, STRING};
use tantivy::{doc, Index, Searcher};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Four documents with `user_id` 1..=4 and `sku` "a".."d", plus a declared
/// `group_id` field that no document populates.
pub fn users_index() -> Index {
    let mut builder = Schema::builder();
    let user_id = builder.add_i64_field("user_id", INDEXED);
    let sku = builder.add_text_field("sku", STRING);
    builder.add_i64_field("group_id", INDEXED);
    let index = Index::create_in_ram(builder.build());

    let mut writer: tantivy::IndexWriter = index.writer_with_num_threads(1, 20_000_000).unwrap();
    for (id, s) in [(1i64, "a"), (2, "b"), (3, "c"), (4, "d")] {
        writer.add_document(doc!(user_id => id, sku => s)).unwrap();
    }
    writer.commit().unwrap();
    index
}

pub fn searcher(index: &Index) -> Searcher {
    index.reader().unwrap().searcher()
}

pub fn count(searcher: &Searcher, query: &dyn tantivy::query::Query) -> usize {
    searcher.search(query, &tantivy::collector::Count).unwrap()
}

#[derive(Debug, Clone)]
pub enum Reply {
    List(Vec<String>),
    Integer(i64),
    Error(String),
}

/// Commands received by a [`spawn_keystore`] server, setup commands excluded.
pub type Seen = Arc<Mutex<Vec<Vec<String>>>>;

/// Minimal RESP server. Connection setup commands (`CLIENT`, `HELLO`,
/// `SELECT`, `PING`) get `+OK`; any other command is answered from `replies`
/// by its upper-cased name, or with an error when absent.
pub async fn spawn_keystore(replies: HashMap<String, Reply>) -> (String, Seen) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let replies = Arc::new(replies);

    let seen_by_server = Arc::clone(&seen);
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let seen = Arc::clone(&seen_by_server);
            let replies = Arc::clone(&replies);
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut reader = BufReader::new(read);
                while let Some(command) = read_command(&mut reader).await {
                    let name = command[0].to_ascii_uppercase();
                    let out = match name.as_str() {
                        "CLIENT" | "HELLO" | "SELECT" | "PING" => "+OK\r\n".to_string(),
                        _ => {
                            seen.lock().unwrap().push(command.clone());
                            encode(replies.get(&name))
                        }
                    };
                    if write.write_all(out.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    (format!("redis://{}", addr), seen)
}

async fn read_command<R>(reader: &mut BufReader<R>) -> Option<Vec<String>>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    if reader.read_line(&mut line).await.ok()? == 0 {
        return None;
    }
    let n: usize = line.trim_end().strip_prefix('*')?.parse().ok()?;
    let mut parts = Vec::with_capacity(n);
    for _ in 0..n {
        // `$len` header, then the payload line.
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        line.clear();
        reader.read_line(&mut line).await.ok()?;
        parts.push(line.trim_end_matches("\r\n").to_string());
    }
    (!parts.is_empty()).then_some(parts)
}

fn encode(reply: Option<&Reply>) -> String {
    match reply {
        Some(Reply::List(items)) => {
            let mut out = format!("*{}\r\n", items.len());
            for item in items {
                out.push_str(&format!("${}\r\n{}\r\n", item.len(), item));
            }
            out
        }
        Some(Reply::Integer(i)) => format!(":{}\r\n", i),
        Some(Reply::Error(msg)) => format!("-{}\r\n", msg),
        None => "-ERR unknown command\r\n".to_string(),
    }
}
