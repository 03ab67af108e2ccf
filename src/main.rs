use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::Parser;
use colored::*;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use clausecheck::api::{AnalysisSource, ApiClient};
use clausecheck::cli::{Cli, Command};
use clausecheck::config::ApiConfig;
use clausecheck::error::ApiError;
use clausecheck::models::{Contract, Flag, RiskLevel};
use clausecheck::negotiate::{self, SelectionSet};
use clausecheck::session::SessionStore;
use clausecheck::{anchor, Reconciler, ViewEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ApiConfig::load(cli.config.as_deref())?;
    let client = ApiClient::new(config)?;
    let mut session = SessionStore::load(&cli.session);

    match cli.command {
        Command::Analyze { file, text, jurisdiction, json } => {
            run_analyze(&client, &mut session, file, text, &jurisdiction, json).await?;
        }
        Command::Report { json } => run_report(&session, json)?,
        Command::Show => run_show(&session)?,
        Command::Explain { risk } => run_explain(&client, &session, &risk).await?,
        Command::Extract { file, jurisdiction } => {
            run_extract(&client, &mut session, &file, &jurisdiction).await?;
        }
        Command::Redline { file, clause, output } => {
            run_redline(&client, &session, &file, &clause, output).await?;
        }
        Command::Negotiate { clauses, message } => {
            run_negotiate(&client, &mut session, clauses, message).await?;
        }
        Command::Reset => {
            session.reset();
            session.save()?;
            println!("Session cleared.");
        }
    }

    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "contract".to_string())
}

// ---------------------------------------------------------------------------
// analyze / extract
// ---------------------------------------------------------------------------

async fn run_analyze(
    client: &ApiClient,
    session: &mut SessionStore,
    file: Option<PathBuf>,
    text: Option<String>,
    jurisdiction: &str,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let (analysis, contract_text) = match (file, text) {
        (None, Some(text)) => {
            let contract_text = text.clone();
            let analysis = client
                .submit_for_analysis(AnalysisSource::Text(text), jurisdiction)
                .await
                .map_err(user_error)?;
            (analysis, contract_text)
        }
        (Some(path), None) => {
            let bytes = fs::read(&path)?;
            let name = file_name(&path);
            // plain-text files carry their own body; binary formats go
            // through the extraction endpoint
            let contract_text = match std::str::from_utf8(&bytes) {
                Ok(body) => body.to_string(),
                Err(_) => client
                    .extract_text(&name, bytes.clone())
                    .await
                    .map_err(user_error)?,
            };
            let analysis = client
                .submit_for_analysis(AnalysisSource::File { name, bytes }, jurisdiction)
                .await
                .map_err(user_error)?;
            (analysis, contract_text)
        }
        _ => return Err("provide a contract file or --text".into()),
    };

    session.set_contract(Contract::ingest(&contract_text, jurisdiction));
    session.set_analysis(analysis)?;
    session.save()?;

    if json {
        let analysis = session.analysis().expect("analysis just set");
        println!("{}", serde_json::to_string_pretty(analysis)?);
    } else {
        render_report(session);
    }
    Ok(())
}

async fn run_extract(
    client: &ApiClient,
    session: &mut SessionStore,
    file: &Path,
    jurisdiction: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = fs::read(file)?;
    let text = client
        .extract_text(&file_name(file), bytes)
        .await
        .map_err(user_error)?;
    session.set_contract(Contract::ingest(&text, jurisdiction));
    session.save()?;
    let contract = session.contract().expect("contract just set");
    println!(
        "Loaded {} characters of contract text. Run `clausecheck analyze` next.",
        contract.cleaned_text.len()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// report / show
// ---------------------------------------------------------------------------

fn run_report(session: &SessionStore, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let Some(analysis) = session.analysis() else {
        return Err("no analysis stored; run `clausecheck analyze` first".into());
    };
    if json {
        println!("{}", serde_json::to_string_pretty(analysis)?);
    } else {
        render_report(session);
    }
    Ok(())
}

fn run_show(session: &SessionStore) -> Result<(), Box<dyn std::error::Error>> {
    let Some(contract) = session.contract() else {
        return Err("no contract loaded; run `clausecheck analyze` first".into());
    };
    for span in anchor::highlight(&contract.cleaned_text, session.clauses()) {
        match span.clause_id.as_deref().and_then(|id| session.clause(id)) {
            Some(clause) => match clause.risk_level {
                RiskLevel::High => print!("{}", span.text.black().on_red()),
                RiskLevel::Medium => print!("{}", span.text.black().on_yellow()),
            },
            None => print!("{}", span.text),
        }
    }
    println!();
    Ok(())
}

fn render_report(session: &SessionStore) {
    let Some(analysis) = session.analysis() else {
        return;
    };
    println!("{}", "CONTRACT ANALYSIS".bright_cyan().bold());
    println!("{}", "=".repeat(50).bright_blue());
    if !analysis.contract_type.is_empty() {
        println!("{}: {}", "Type".bright_yellow(), analysis.contract_type);
    }
    println!(
        "{}: {}",
        "Health score".bright_yellow(),
        health_colored(analysis.health_score)
    );
    if !analysis.summary.is_empty() {
        println!("{}: {}", "Summary".bright_yellow(), analysis.summary);
    }
    if !analysis.key_details.is_empty() {
        println!("{}:", "Key details".bright_yellow());
        for detail in &analysis.key_details {
            println!("  - {detail}");
        }
    }
    print_flag_group("RED FLAGS", &analysis.red_flags, Color::BrightRed);
    print_flag_group("YELLOW FLAGS", &analysis.yellow_flags, Color::BrightYellow);
    print_flag_group("GREEN FLAGS", &analysis.green_flags, Color::BrightGreen);

    if !session.clauses().is_empty() {
        println!();
        println!("{}", "NEGOTIABLE CLAUSES".bright_cyan().bold());
        for clause in session.clauses() {
            let id = match clause.risk_level {
                RiskLevel::High => clause.id.bright_red(),
                RiskLevel::Medium => clause.id.bright_yellow(),
            };
            println!("  [{}] {}", id, clause.title);
        }
        println!(
            "\nNegotiate with: clausecheck negotiate -c {}",
            session.clauses()[0].id
        );
    }
}

fn print_flag_group(title: &str, flags: &[Flag], color: Color) {
    if flags.is_empty() {
        return;
    }
    println!();
    println!("{}", title.color(color).bold());
    for flag in flags {
        println!("  {} {}", "*".color(color), flag.analysis_text);
        if clausecheck::models::usable_anchor(&flag.original_text) {
            println!("    {}", format!("\"{}\"", flag.original_text).dimmed());
        }
    }
}

fn health_colored(score: f64) -> ColoredString {
    let rendered = format!("{:.0}/100", score);
    if score >= 70.0 {
        rendered.bright_green()
    } else if score >= 40.0 {
        rendered.bright_yellow()
    } else {
        rendered.bright_red()
    }
}

// ---------------------------------------------------------------------------
// explain / redline
// ---------------------------------------------------------------------------

async fn run_explain(
    client: &ApiClient,
    session: &SessionStore,
    risk: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    // a clause id resolves to its body; anything else is taken verbatim
    let risk_text = session
        .clause(risk)
        .map(|clause| clause.body.clone())
        .unwrap_or_else(|| risk.to_string());
    let context = session
        .contract()
        .map(|contract| contract.cleaned_text.clone())
        .unwrap_or_default();
    let explanation = client
        .explain_risk(&risk_text, &context)
        .await
        .map_err(user_error)?;
    println!("{explanation}");
    Ok(())
}

async fn run_redline(
    client: &ApiClient,
    session: &SessionStore,
    file: &Path,
    clause_id: &str,
    output: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(clause) = session.clause(clause_id) else {
        return Err(format!("unknown clause id: {clause_id}").into());
    };
    let bytes = fs::read(file)?;
    let document = client
        .request_redline(
            &file_name(file),
            bytes,
            &clause.body,
            session.jurisdiction(),
            &clause.title,
        )
        .await
        .map_err(user_error)?;
    let output = output.unwrap_or_else(|| {
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "contract".to_string());
        PathBuf::from(format!("{stem}_redlined.docx"))
    });
    fs::write(&output, document)?;
    println!("Wrote redlined document to {}", output.display());
    Ok(())
}

// ---------------------------------------------------------------------------
// negotiate
// ---------------------------------------------------------------------------

async fn run_negotiate(
    client: &ApiClient,
    session: &mut SessionStore,
    clause_ids: Vec<String>,
    message: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(contract) = session.contract() else {
        return Err("no contract loaded; run `clausecheck analyze` first".into());
    };
    let mut reconciler = Reconciler::new(contract.cleaned_text.clone());
    let mut selection = SelectionSet::new();

    let (tx, rx) = mpsc::unbounded_channel();
    reconciler.view_tx = Some(tx);
    let renderer = tokio::spawn(render_view_events(rx));

    for id in &clause_ids {
        let Some(clause) = session.clause(id) else {
            renderer.abort();
            return Err(format!("unknown clause id: {id}").into());
        };
        let clause = clause.clone();
        if let Some(announcement) = selection.select(&clause) {
            reconciler.push_user_message(announcement);
        }
    }

    if let Some(message) = message {
        // one-shot turn over the clauses given on the command line
        run_one_turn(client, session, &mut selection, &mut reconciler, Some(message.as_str()))
            .await?;
    } else {
        interactive_loop(client, session, &mut selection, &mut reconciler).await?;
    }

    renderer.abort();
    session.save()?;
    let remaining = session.clauses().len();
    if remaining > 0 {
        println!("{remaining} flagged clause(s) remain.");
    } else {
        println!("All flagged clauses resolved.");
    }
    Ok(())
}

async fn run_one_turn(
    client: &ApiClient,
    session: &mut SessionStore,
    selection: &mut SelectionSet,
    reconciler: &mut Reconciler,
    message: Option<&str>,
) -> Result<(), Box<dyn std::error::Error>> {
    reconciler.reset_cancel();
    let cancel = reconciler.cancel_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    print!("{} ", "agent>".bright_cyan().bold());
    let _ = io::stdout().flush();
    let targeted = selection.ids().to_vec();
    let result = negotiate::negotiate_many(
        client,
        session,
        selection,
        reconciler,
        &targeted,
        message,
    )
    .await;
    ctrl_c.abort();

    match result {
        Ok(outcome) => {
            if outcome.done {
                for id in &targeted {
                    println!("{}", format!("resolved {id}").bright_green());
                }
            }
            session.save()?;
            Ok(())
        }
        // pre-flight rejections never reached the transcript; everything
        // else was already rendered inline as an agent message
        Err(err @ ApiError::InvalidInput(_)) => Err(err.user_message().into()),
        Err(_) => Ok(()),
    }
}

async fn interactive_loop(
    client: &ApiClient,
    session: &mut SessionStore,
    selection: &mut SelectionSet,
    reconciler: &mut Reconciler,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", "Interactive negotiation. Commands:".bright_white());
    println!("  /list          show clauses and selection");
    println!("  /select ID     add a clause to the negotiation");
    println!("  /deselect ID   remove a clause from the negotiation");
    println!("  /quit          leave");
    println!("Anything else is sent to the negotiation agent. Ctrl-C cancels a stream.");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", "you>".bright_green().bold());
        let _ = io::stdout().flush();
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" || line == "/q" {
            break;
        }
        if line == "/list" {
            for clause in session.clauses() {
                let marker = if selection.contains(&clause.id) { "x" } else { " " };
                println!("  [{marker}] {} ({}) {}", clause.id, clause.risk_level, clause.title);
            }
            continue;
        }
        if let Some(id) = line.strip_prefix("/select ") {
            let id = id.trim();
            match session.clause(id) {
                Some(clause) => {
                    let clause = clause.clone();
                    if let Some(announcement) = selection.select(&clause) {
                        println!("{}", announcement.dimmed());
                        reconciler.push_user_message(announcement);
                    }
                }
                None => println!("{}", format!("unknown clause id: {id}").bright_red()),
            }
            continue;
        }
        if let Some(id) = line.strip_prefix("/deselect ") {
            selection.deselect(id.trim());
            continue;
        }

        if selection.is_empty() {
            println!(
                "{}",
                "No clauses selected. Use /select ID first.".bright_yellow()
            );
            continue;
        }
        run_one_turn(client, session, selection, reconciler, Some(line.as_str())).await?;
        if session.clauses().is_empty() {
            println!("{}", "All flagged clauses resolved.".bright_green());
            break;
        }
    }
    Ok(())
}

async fn render_view_events(mut rx: mpsc::UnboundedReceiver<ViewEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ViewEvent::AgentDelta { text } => {
                print!("{}", text.bright_cyan());
                let _ = io::stdout().flush();
            }
            ViewEvent::AgentMessage { text } => {
                println!();
                println!("{}", text.bright_red());
            }
            ViewEvent::ShowDocument => {
                println!();
                println!("{}", "[agent is rewriting the document]".bright_magenta());
            }
            // full-document replacements are not echoed per delta; the
            // updated text is available via `clausecheck show`
            ViewEvent::DocumentReplaced { .. } => {}
            ViewEvent::TurnEnded { done, edited } => {
                println!();
                if done && edited {
                    println!(
                        "{}",
                        "(document updated, run `clausecheck show` to view)".bright_magenta()
                    );
                }
            }
        }
    }
}

fn user_error(err: ApiError) -> Box<dyn std::error::Error> {
    err.user_message().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_from_path() {
        assert_eq!(file_name(Path::new("/tmp/contract.docx")), "contract.docx");
        assert_eq!(file_name(Path::new("lease.pdf")), "lease.pdf");
    }

    #[test]
    fn test_health_banding() {
        // band edges: >= 70 green, >= 40 yellow, else red
        let healthy = format!("{:?}", health_colored(85.0));
        let risky = format!("{:?}", health_colored(40.0));
        let bad = format!("{:?}", health_colored(12.0));
        assert!(healthy.contains("85/100"));
        assert!(risky.contains("40/100"));
        assert!(bad.contains("12/100"));
    }

    #[test]
    fn test_user_error_carries_friendly_text() {
        let boxed = user_error(ApiError::EmptyExtraction);
        assert!(boxed.to_string().contains("No text could be extracted"));
    }
}
