mod chat;
mod cli;
mod watch;

use cli::{CliError, CliOptions, Command};
use tracing::{error, info};
use vctt_client::{ClientConfig, SessionStore, connect_backend};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "vctt_console=info,vctt_client=info".to_string()),
        )
        .with_writer(std::io::stderr)
        .init();

    let options = match CliOptions::parse(std::env::args().skip(1)) {
        Ok(options) => options,
        Err(CliError::HelpRequested) => {
            print_usage();
            std::process::exit(0);
        }
        Err(err) => {
            eprintln!("error: {err}");
            eprintln!();
            print_usage();
            std::process::exit(2);
        }
    };

    let mut config = match ClientConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to read client config: {err}");
            std::process::exit(1);
        }
    };
    if let Some(user_id) = options.user_id {
        config.user_id = user_id;
    }

    let backend = match connect_backend(&config) {
        Ok(backend) => backend,
        Err(err) => {
            error!("failed to build backend client: {err}");
            std::process::exit(1);
        }
    };
    info!(
        command = options.command.as_str(),
        user_id = %config.user_id,
        mock = config.uses_mock_backend(),
        "vctt console starting"
    );

    let result = match options.command {
        Command::Chat {
            session_id,
            follow_phases,
        } => chat::run_chat(&config, backend, session_id, follow_phases)
            .await
            .map_err(|err| err.to_string()),
        Command::Watch { goal_id } => {
            watch::run_watch(&config, backend, goal_id).await;
            Ok(())
        }
        Command::Sessions => {
            let mut store = SessionStore::new(backend, config.user_id.clone())
                .with_list_limit(config.session_list_limit);
            match store.refresh_sessions().await {
                Ok(_) => {
                    chat::print_sessions(&store);
                    Ok(())
                }
                Err(err) => Err(err.to_string()),
            }
        }
    };

    if let Err(err) = result {
        error!("{err}");
        std::process::exit(1);
    }
}

fn print_usage() {
    eprintln!(
        "Usage: vctt-console <command> [options]\n\
         \n\
         Commands:\n\
         - chat       Interactive chat session over stdin\n\
         - watch      Poll execution status, goals, activity and committee stats until Ctrl-C\n\
         - sessions   List the sessions the backend knows for this user\n\
         \n\
         Options:\n\
         - --user <id>      Override VCTT_USER_ID\n\
         - --session <id>   (chat) Resume an existing session\n\
         - --phases         (chat) Follow the backend phase stream while a turn runs\n\
         - --goal <id>      (watch) Also poll the subtasks of one goal\n\
         - --help           Show this help text\n\
         \n\
         Without VCTT_BACKEND_URL a local mock backend answers with canned replies."
    );
}
