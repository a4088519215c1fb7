// Module declarations
mod cli;
mod types;
mod util;
mod claude;
mod oauth;
mod credentials;
mod tool_defs;
mod tool_args;
mod gmail;
mod gcal;
mod whatsapp;
mod tool_exec;
mod continuation;
mod engine;
mod server;

// Re-export module items at crate root so cross-module references share one
// namespace.
#[allow(unused_imports)]
pub(crate) use cli::*;
#[allow(unused_imports)]
pub(crate) use types::*;
#[allow(unused_imports)]
pub(crate) use util::*;
#[allow(unused_imports)]
pub(crate) use claude::*;
#[allow(unused_imports)]
pub(crate) use oauth::*;
#[allow(unused_imports)]
pub(crate) use credentials::*;
#[allow(unused_imports)]
pub(crate) use tool_defs::*;
#[allow(unused_imports)]
pub(crate) use tool_args::*;
#[allow(unused_imports)]
pub(crate) use gmail::*;
#[allow(unused_imports)]
pub(crate) use gcal::*;
#[allow(unused_imports)]
pub(crate) use whatsapp::*;
#[allow(unused_imports)]
pub(crate) use tool_exec::*;
#[allow(unused_imports)]
pub(crate) use continuation::*;
#[allow(unused_imports)]
pub(crate) use engine::*;
#[allow(unused_imports)]
pub(crate) use server::*;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

fn resolve_public_url(cli: Option<String>, port: u16) -> String {
    if let Some(url) = cli {
        return url.trim_end_matches('/').to_string();
    }
    if let Some(url) = env_optional("CONCIERGE_PUBLIC_URL") {
        return url.trim_end_matches('/').to_string();
    }
    format!("http://localhost:{port}")
}

struct Runtime {
    engine: Arc<ConversationEngine>,
    credentials: Arc<CredentialStore>,
    messenger: Arc<dyn Messenger>,
}

fn build_runtime(workspace: &Path, public_url: &str) -> Result<Runtime, Box<dyn std::error::Error>> {
    fs::create_dir_all(workspace)?;
    let auth = Arc::new(GoogleAuthServer::from_env(public_url)?);
    let credentials = Arc::new(CredentialStore::open(workspace, auth, google_scopes()));
    let model: Arc<dyn ModelClient> = Arc::new(ClaudeModel);
    let messenger: Arc<dyn Messenger> = Arc::new(TwilioMessenger::from_env()?);
    let notifier = ContinuationBridge::spawn(model.clone(), messenger.clone());
    let invoker = Arc::new(ToolInvoker::new(
        credentials.clone(),
        Arc::new(GmailHttp),
        Arc::new(CalendarHttp),
        messenger.clone(),
        notifier,
    ));
    let max_steps = env_usize("CONCIERGE_MAX_STEPS", DEFAULT_MAX_STEPS)?;
    let engine = Arc::new(ConversationEngine::new(
        model,
        invoker,
        PERSONA_PROMPT,
        max_steps,
    ));
    Ok(Runtime {
        engine,
        credentials,
        messenger,
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            bind,
            port,
            public_url,
            workspace,
        } => {
            let workspace = resolve_workspace(workspace);
            let public_url = resolve_public_url(public_url, port);
            let runtime = build_runtime(&workspace, &public_url)?;
            let reply_timeout =
                Duration::from_secs(env_u64("CONCIERGE_REPLY_TIMEOUT_SECS", 12)?);
            run_server(
                bind,
                port,
                runtime.engine,
                runtime.credentials,
                runtime.messenger,
                reply_timeout,
            )
        }

        Command::Ask {
            prompt,
            public_url,
            workspace,
        } => {
            let workspace = resolve_workspace(workspace);
            let public_url = resolve_public_url(public_url, 8080);
            let runtime = build_runtime(&workspace, &public_url)?;
            let outcome = runtime.engine.run_turn(&prompt, None);
            match outcome.final_text {
                Some(text) => println!("{text}"),
                None => eprintln!("(no reply after {} steps)", outcome.steps_used),
            }
            Ok(())
        }

        Command::AuthUrl { public_url } => {
            let public_url = resolve_public_url(public_url, 8080);
            let auth = GoogleAuthServer::from_env(&public_url)?;
            println!("{}", auth.authorization_url(&google_scopes()));
            Ok(())
        }
    }
}
