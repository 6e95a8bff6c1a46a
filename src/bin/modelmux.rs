//! modelmux — 命令行对话工具：单次问答、流式输出、列出支持的厂商。
//!
//! Usage:
//!   modelmux ask <provider> <model> <prompt> [options]     One completion
//!   modelmux stream <provider> <model> <prompt> [options]  Stream the answer
//!   modelmux providers                                     List vendors and capabilities

use std::io::Write;

use anyhow::{anyhow, bail, Context};
use modelmux::client::{ExecutionOutcome, Executor};
use modelmux::drivers::{Provider, ProviderConfig, ProviderKind};
use modelmux::logging::init_logging;
use modelmux::types::{ChatRequest, Message, ReasoningEffort};
use modelmux::RetryPolicy;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        print_usage();
        std::process::exit(1);
    };

    match command.as_str() {
        "ask" => cmd_call(&args[1..], false).await,
        "stream" => cmd_call(&args[1..], true).await,
        "providers" | "list" => {
            cmd_providers();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("modelmux {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"modelmux — one chat interface over several LLM vendors

USAGE:
    modelmux <COMMAND> [OPTIONS]

COMMANDS:
    ask <provider> <model> <prompt>      Send one request and print the answer
    stream <provider> <model> <prompt>   Print the answer as it streams in
    providers                            List vendors, key variables and capabilities
    version                              Show version information
    help                                 Show this help message

OPTIONS (ask, stream):
    --system <text>          System message
    --fallback <model>       Fallback model, repeatable
    --temperature <t>        Sampling temperature
    --max-tokens <n>         Completion token limit
    --reasoning <level>      minimal | low | medium | high
    --json                   Ask for a JSON object
    --base-url <url>         Override the vendor endpoint (required for azure)
    --retries <n>            Maximum retries per model (default 3)
    --debug                  Log a summary line per request

ENVIRONMENT:
    OPENAI_API_KEY, AZURE_OPENAI_API_KEY, OPENROUTER_API_KEY, ANTHROPIC_API_KEY,
    GOOGLE_API_KEY / GEMINI_API_KEY, OLLAMA_API_KEY
    MODELMUX_RPS                 Requests per second across all calls
    MODELMUX_HTTP_TIMEOUT_SECS   Request timeout (default 120)
    RUST_LOG                     Log filter (default info)"#
    );
}

#[derive(Debug, Default)]
struct CallArgs {
    provider: String,
    model: String,
    prompt: Vec<String>,
    system: Option<String>,
    fallbacks: Vec<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    reasoning: Option<ReasoningEffort>,
    json: bool,
    base_url: Option<String>,
    retries: Option<u32>,
    debug: bool,
}

fn parse_call_args(args: &[String]) -> anyhow::Result<CallArgs> {
    let mut out = CallArgs::default();
    let mut positional = Vec::new();
    let mut it = args.iter();
    while let Some(arg) = it.next() {
        let mut value = |flag: &str| {
            it.next()
                .cloned()
                .ok_or_else(|| anyhow!("{flag} needs a value"))
        };
        match arg.as_str() {
            "--system" => out.system = Some(value("--system")?),
            "--fallback" => out.fallbacks.push(value("--fallback")?),
            "--temperature" => {
                out.temperature = Some(value("--temperature")?.parse().context("--temperature")?)
            }
            "--max-tokens" => {
                out.max_tokens = Some(value("--max-tokens")?.parse().context("--max-tokens")?)
            }
            "--reasoning" => {
                let raw = value("--reasoning")?;
                out.reasoning = Some(
                    ReasoningEffort::parse(&raw)
                        .ok_or_else(|| anyhow!("unknown reasoning level: {raw}"))?,
                );
            }
            "--base-url" => out.base_url = Some(value("--base-url")?),
            "--retries" => out.retries = Some(value("--retries")?.parse().context("--retries")?),
            "--json" => out.json = true,
            "--debug" => out.debug = true,
            flag if flag.starts_with("--") => bail!("unknown option: {flag}"),
            _ => positional.push(arg.clone()),
        }
    }

    let mut positional = positional.into_iter();
    out.provider = positional.next().ok_or_else(|| anyhow!("missing <provider>"))?;
    out.model = positional.next().ok_or_else(|| anyhow!("missing <model>"))?;
    out.prompt = positional.collect();
    if out.prompt.is_empty() {
        bail!("missing <prompt>");
    }
    Ok(out)
}

fn build_request(args: &CallArgs) -> ChatRequest {
    let mut messages = Vec::new();
    if let Some(system) = &args.system {
        messages.push(Message::system(system.clone()));
    }
    messages.push(Message::user(args.prompt.join(" ")));

    let mut req = ChatRequest::new(args.model.clone(), messages).json_mode(args.json);
    if let Some(t) = args.temperature {
        req = req.temperature(t);
    }
    if let Some(n) = args.max_tokens {
        req = req.max_tokens(n);
    }
    if let Some(effort) = args.reasoning {
        req = req.reasoning(effort);
    }
    req
}

async fn cmd_call(raw: &[String], stream: bool) -> anyhow::Result<()> {
    init_logging();
    let args = parse_call_args(raw)?;
    let kind = ProviderKind::parse(&args.provider)
        .ok_or_else(|| anyhow!("unknown provider: {}", args.provider))?;

    let mut config = ProviderConfig::new();
    if let Some(url) = &args.base_url {
        config = config.with_base_url(url.clone());
    }
    let provider = Provider::new(kind, config)?;

    let mut policy = RetryPolicy::default();
    if let Some(n) = args.retries {
        policy = policy.with_max_retries(n);
    }
    let executor = Executor::builder(provider)
        .retry_policy(policy)
        .fallbacks(args.fallbacks.clone())
        .debug(args.debug)
        .build();

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_ctrl_c.cancel();
        }
    });

    let request = build_request(&args);
    let outcome = if stream {
        let mut stdout = std::io::stdout();
        let outcome = executor
            .execute_stream(
                &request,
                &mut |delta: &str| {
                    let _ = stdout.write_all(delta.as_bytes());
                    let _ = stdout.flush();
                },
                &cancel,
            )
            .await?;
        println!();
        outcome
    } else {
        let outcome = executor.execute(&request, &cancel).await?;
        println!("{}", outcome.content);
        outcome
    };

    print_summary(&outcome);
    Ok(())
}

fn print_summary(outcome: &ExecutionOutcome) {
    for call in &outcome.tool_calls {
        eprintln!("tool call {} {}({})", call.id, call.name, call.arguments);
    }
    for failure in &outcome.failures {
        eprintln!("fell back from {}: {}", failure.model, failure.error);
    }
    eprintln!(
        "[{} | {} prompt + {} completion tokens | {} ms | {} retries]",
        outcome.model,
        outcome.prompt_tokens,
        outcome.completion_tokens,
        outcome.latency.as_millis(),
        outcome.retries
    );
}

fn cmd_providers() {
    println!("{:<12} {:<48} {:<40} CAPABILITIES", "PROVIDER", "BASE URL", "KEY");
    for kind in ProviderKind::ALL {
        let caps = kind.capabilities();
        let flags: Vec<&str> = [
            (caps.tools, "tools"),
            (caps.vision, "vision"),
            (caps.streaming, "streaming"),
            (caps.json, "json"),
            (caps.reasoning, "reasoning"),
            (caps.pdf, "pdf"),
            (caps.web_search, "web_search"),
            (caps.file_search, "file_search"),
            (caps.code_interpreter, "code_interpreter"),
            (caps.mcp, "mcp"),
        ]
        .into_iter()
        .filter_map(|(on, name)| on.then_some(name))
        .collect();
        let key = if kind.requires_api_key() {
            kind.api_key_vars().join(" | ")
        } else {
            format!("{} (optional)", kind.api_key_vars().join(" | "))
        };
        println!(
            "{:<12} {:<48} {:<40} {}",
            kind.as_str(),
            kind.default_base_url().unwrap_or("(set --base-url)"),
            key,
            flags.join(",")
        );
    }
}
