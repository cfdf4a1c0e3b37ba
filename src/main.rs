use std::collections::HashMap;
use std::time::Duration;

use assist_offload::timing;
use assist_offload::{Executor, ExecutorConfig, SubmitOptions};
use futures::future::join_all;

const SAMPLE_MESSAGES: &[&str] = &[
    "hey can you send me the sticker from yesterday",
    "deploy the bot again please, the last deploy failed",
    "what's the weather like, also send the weather sticker",
    "translate this for me please",
];

/// Count word frequencies across a batch of messages.
fn word_frequencies(
    messages: Vec<String>,
) -> Result<HashMap<String, usize>, std::convert::Infallible> {
    let mut counts = HashMap::new();
    for message in &messages {
        for word in message.split_whitespace() {
            let word = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if !word.is_empty() {
                *counts.entry(word).or_insert(0) += 1;
            }
        }
    }
    Ok(counts)
}

fn parse_port(raw: String) -> Result<u16, std::num::ParseIntError> {
    raw.parse()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ExecutorConfig::from_env()?;
    eprintln!("🧵 AI Assist offload v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Workers: {}", config.max_workers);
    eprintln!("   Task timeout: {:?}", config.task_timeout);

    let executor = Executor::new(config)?;

    // ── Text processing ─────────────────────────────────────────────────
    let messages: Vec<String> = SAMPLE_MESSAGES.iter().map(|m| m.to_string()).collect();
    let counts = executor
        .submit(
            move || word_frequencies(messages),
            SubmitOptions::new()
                .task_type("word_frequencies")
                .context("source", "demo"),
        )
        .await?;
    let mut top: Vec<_> = counts.into_iter().collect();
    top.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (word, count) in top.iter().take(3) {
        eprintln!("   {word}: {count}");
    }

    // ── Concurrent batch with a failure ─────────────────────────────────
    let batch = ["8080", "443", "not-a-port"].map(|raw| {
        let raw = raw.to_string();
        executor.submit(move || parse_port(raw), SubmitOptions::new().task_type("parse_port"))
    });
    let results = timing::timed_default("parse batch", join_all(batch)).await;
    for result in results {
        match result {
            Ok(port) => eprintln!("   parsed port {port}"),
            Err(e) => eprintln!("   parse failed: {e}"),
        }
    }

    // ── Timeout ─────────────────────────────────────────────────────────
    let slow = executor
        .submit(
            || {
                std::thread::sleep(Duration::from_millis(300));
                Ok::<_, std::convert::Infallible>(())
            },
            SubmitOptions::new()
                .task_type("slow_render")
                .timeout(Duration::from_millis(50)),
        )
        .await;
    if let Err(e) = slow {
        eprintln!("   slow_render: {e}");
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&executor.get_task_stats())?
    );

    let shutdown = executor.clone();
    tokio::task::spawn_blocking(move || shutdown.shutdown()).await?;

    Ok(())
}
