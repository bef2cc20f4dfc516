mod config;

use clap::Parser;
use log::{error, info, warn};
use relay::RelayError;
use stakker::{actor, fwd, ret_nop};

use config::Config;

#[derive(Debug, Parser)]
#[command(author, version, about = "Rendezvous-backed P2P chat transport", long_about = None)]
struct Args {
	#[arg(short, long, value_name = "FILE", default_value = "chat.toml")]
	config: String,
}

fn main() {
	runtime::logger::install(log::LevelFilter::Info);

	let args = Args::parse();

	let config = match Config::from_file(&args.config) {
		Ok(config) => config,
		Err(err) => {
			error!("Failed to load config file {}: {err}", args.config);
			return;
		}
	};

	let mut stakker = runtime::init();
	let s = &mut stakker;

	let on_disconnect = fwd!(|_: ()| warn!("Lost connection to rendezvous server"));
	let on_reconnected = fwd!(|_: ()| info!("Reconnected to rendezvous server"));
	let on_fatal = fwd!(|err: RelayError| error!("Rendezvous connection failed permanently: {err}"));

	let _relay = actor!(s, relay::RelayChannel::init(config.relay.host.clone(), config.relay.port, on_disconnect, on_reconnected, on_fatal,), ret_nop!());

	if relay::persist::load_token(&config.token_path).is_some() {
		info!("Loaded a persisted session token, attempting auto-login");
	} else {
		info!("No persisted session token found; interactive login required");
	}

	runtime::exec(&mut stakker, || info!("Shutting down")).ok();
}
