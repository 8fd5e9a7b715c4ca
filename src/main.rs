//! Hive 命令行
//!
//! 用法: hive <任务描述...>
//! 运行一个任务；每次暂停时展示起草的调用与待审批动作，并在终端询问 approve? [y/N/feedback]。

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use hive::config::load_config_or_default;
use hive::core::{TaskRecord, TaskStatus};
use hive::AgentRuntime;

enum Answer {
    Approve,
    Reject(Option<String>),
    Quit,
}

async fn ask(lines: &mut tokio::io::Lines<BufReader<tokio::io::Stdin>>, question: &str) -> anyhow::Result<Answer> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(question.as_bytes()).await?;
    stdout.flush().await?;
    let Some(line) = lines.next_line().await? else {
        return Ok(Answer::Quit);
    };
    let line = line.trim();
    Ok(match line {
        "y" | "Y" | "yes" => Answer::Approve,
        "" | "n" | "N" | "no" => Answer::Reject(None),
        feedback => Answer::Reject(Some(feedback.to_string())),
    })
}

fn show_pause(record: &TaskRecord) {
    let ctx = &record.context;
    println!("\n--- paused before {} ---", record.resume_at.as_deref().unwrap_or("?"));
    if let Some(step) = ctx.current_step() {
        println!("step {}/{}: {}", ctx.current_step_index + 1, ctx.plan.len(), step);
    }
    for call in &ctx.drafted_calls {
        println!("  drafted  {} {}", call.name, call.args);
    }
    for p in ctx.pending_approvals.iter().filter(|p| p.is_open()) {
        println!("  pending  {} {} ({:?})", p.tool, p.args, p.kind);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    hive::observability::init();

    let prompt = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if prompt.trim().is_empty() {
        eprintln!("usage: hive <task description>");
        std::process::exit(2);
    }

    let cfg = load_config_or_default(None);
    let runtime = AgentRuntime::from_config(cfg).await;
    println!("workspace: {}", runtime.workspace.display());

    let id = runtime.tasks.create(prompt).await;
    let mut record = runtime.tasks.run(&id).await.context("task run failed")?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match record.status {
            TaskStatus::AwaitingApproval => {
                show_pause(&record);
                record = match ask(&mut lines, "approve? [y/N/feedback] ").await? {
                    Answer::Approve => runtime.tasks.approve(&id).await?,
                    Answer::Reject(feedback) => runtime.tasks.reject(&id, feedback).await?,
                    Answer::Quit => break,
                };
            }
            TaskStatus::Halted if record.context.has_open_escalation() => {
                println!("\n--- halted: retry limit exceeded ---");
                for e in record.context.escalations().filter(|e| e.is_open()) {
                    println!("  last failure: {} {}", e.tool, e.args);
                }
                match ask(&mut lines, "clear escalation and retry? [y/N] ").await? {
                    Answer::Approve => record = runtime.tasks.approve(&id).await?,
                    Answer::Reject(_) => {
                        record = runtime.tasks.reject(&id, None).await?;
                        break;
                    }
                    Answer::Quit => break,
                }
            }
            _ => break,
        }
    }

    println!("\n--- {:?} ---", record.status);
    if let Some(reason) = &record.stop_reason {
        println!("stopped: {}", reason);
    }
    println!("{}", serde_json::to_string_pretty(&record.context)?);

    runtime.shutdown().await;
    Ok(())
}
