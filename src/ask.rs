//! `coach ask` and `coach chat`.
//!
//! Both commands start a worker, initialize it with the configured
//! knowledge base, and route questions through [`CoachHandle::ask`].

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use trail_coach_core::responder::{Confidence, Response};

use crate::config::Config;
use crate::knowledge::load_knowledge_base;
use crate::progress::{spawn_event_renderer, ProgressMode};
use crate::worker::{self, Coach, CoachHandle};

async fn start_coach(config: &Config, mode: ProgressMode) -> Result<CoachHandle> {
    let knowledge_base = load_knowledge_base(&config.knowledge.path)?;
    let coach = Coach::from_config(config).await?;
    let (handle, events) = worker::spawn(coach);
    spawn_event_renderer(events, mode);

    handle
        .init(knowledge_base)
        .await
        .context("Failed to initialize the coach")?;
    Ok(handle)
}

/// Answer a single question and exit.
pub async fn run_ask(config: &Config, question: &str, json: bool, mode: ProgressMode) -> Result<()> {
    let question = question.trim();
    if question.is_empty() {
        bail!("question must not be empty");
    }

    let handle = start_coach(config, mode).await?;
    let response = handle.ask(question).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        print_response(&response);
    }
    Ok(())
}

/// Interactive loop over stdin. `/reset` clears the cache and re-initializes,
/// `/quit` exits.
pub async fn run_chat(config: &Config, mode: ProgressMode) -> Result<()> {
    let handle = start_coach(config, mode).await?;
    println!("Ask a question (/reset to rebuild the index, /quit to exit).");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let line = match lines.next_line().await? {
            Some(line) => line,
            None => break,
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" | "/exit" => break,
            "/reset" => {
                handle.reset().await?;
                let knowledge_base = load_knowledge_base(&config.knowledge.path)?;
                let report = handle.init(knowledge_base).await?;
                println!(
                    "Index rebuilt: {} entries, {} phrasings embedded.",
                    report.entries, report.embedded
                );
            }
            question => match handle.ask(question).await {
                Ok(response) => print_response(&response),
                // Per-question failures leave the session usable.
                Err(e) => println!("[error] {}", e),
            },
        }
    }
    Ok(())
}

/// Human-readable rendering of a [`Response`].
pub fn format_response(response: &Response) -> String {
    let mut out = String::new();
    out.push_str(&response.text);
    out.push('\n');

    match response.confidence {
        Confidence::Confident => {
            if !response.sources.is_empty() {
                out.push_str("\nSources:\n");
                for source in &response.sources {
                    out.push_str(&format!(
                        "  - {} ({}) {}%\n",
                        source.source, source.category, source.score
                    ));
                }
            }
            if !response.related.is_empty() {
                out.push_str("\nRelated:\n");
                for related in &response.related {
                    out.push_str(&format!(
                        "  - [{}%] {} ({})\n",
                        related.score, related.answer, related.source
                    ));
                }
            }
        }
        Confidence::Low => {
            if let Some(best) = response.best_score {
                out.push_str(&format!("\n(closest match: {}%)\n", best));
            }
        }
        Confidence::NoMatch => {}
    }
    out
}

fn print_response(response: &Response) {
    println!();
    print!("{}", format_response(response));
    println!();
}
