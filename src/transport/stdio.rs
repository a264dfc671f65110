//! One JSON-RPC message per line on stdin, one response per line on stdout.
//!
//! Logs go to stderr so stdout carries nothing but responses.

use std::future::Future;

use anyhow::Context as _;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::context::AppContext;
use crate::dispatcher::Dispatcher;

pub async fn run(ctx: &AppContext, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
    tracing::info!("serving MCP over stdio");
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve(&ctx.dispatcher, stdin, stdout, shutdown).await
}

/// Read frames until EOF or `shutdown`. A frame being handled is always
/// finished and written before shutdown is honoured.
pub async fn serve<R, W>(
    dispatcher: &Dispatcher,
    reader: R,
    mut writer: W,
    shutdown: impl Future<Output = ()>,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    tokio::pin!(shutdown);

    loop {
        let line = tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!("stdio transport stopping");
                break;
            }
            line = lines.next_line() => line.context("failed to read from stdin")?,
        };

        let Some(line) = line else {
            tracing::info!("stdin closed");
            break;
        };
        let frame = line.trim();
        if frame.is_empty() {
            continue;
        }

        if let Some(response) = dispatcher.handle(frame.as_bytes()).await {
            let mut out = response.to_json();
            out.push('\n');
            writer
                .write_all(out.as_bytes())
                .await
                .context("failed to write to stdout")?;
            writer.flush().await.context("failed to flush stdout")?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::{json, Value};

    use crate::db::mock::MockExecutor;
    use crate::redact::Redactor;
    use crate::tools::ToolRegistry;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(
            Arc::new(MockExecutor::new()),
            Arc::new(ToolRegistry::builtin()),
            Redactor::default(),
        )
    }

    async fn exchange(input: &str) -> Vec<Value> {
        let mut out = Vec::new();
        serve(&dispatcher(), input.as_bytes(), &mut out, std::future::pending())
            .await
            .expect("serve");
        String::from_utf8(out)
            .expect("utf8")
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect()
    }

    #[tokio::test]
    async fn test_one_response_per_request() {
        let input = concat!(
            r#"{"jsonrpc":"2.0","method":"ping","id":1}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"tools/list","id":2}"#,
            "\n"
        );
        let responses = exchange(input).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], json!(1));
        assert_eq!(responses[1]["result"]["tools"].as_array().map(Vec::len), Some(11));
    }

    #[tokio::test]
    async fn test_bad_frame_does_not_stop_the_loop() {
        let input = "not json\n{\"jsonrpc\":\"2.0\",\"method\":\"ping\",\"id\":\"a\"}\n";
        let responses = exchange(input).await;
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["error"]["code"], json!(-32700));
        assert_eq!(responses[0]["id"], Value::Null);
        assert_eq!(responses[1]["id"], json!("a"));
    }

    #[tokio::test]
    async fn test_last_line_without_newline() {
        let responses = exchange(r#"{"jsonrpc":"2.0","method":"ping","id":9}"#).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["result"], json!({}));
    }

    #[tokio::test]
    async fn test_shutdown_stops_waiting_for_input() {
        let (_client, server) = tokio::io::duplex(64);
        let mut out = Vec::new();
        tokio::time::timeout(
            std::time::Duration::from_secs(1),
            serve(&dispatcher(), BufReader::new(server), &mut out, async {}),
        )
        .await
        .expect("stops on shutdown")
        .expect("serve");
        assert!(out.is_empty());
    }
}
