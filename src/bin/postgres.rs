extern crate chrono;
extern crate pullstat;

#[macro_use]
extern crate log;

use chrono::Utc;
use pullstat::collector::postgres::{self, SqlxStatistics};
use pullstat::collector::PostgresCollector;
use pullstat::config;
use pullstat::logging;
use pullstat::plugin::{self, HostError, Mode, Plugin};
use std::io;
use std::process;

fn run(mode: Mode, args: &config::PostgresArgs) -> Result<(), HostError> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    if mode == Mode::Definitions {
        return plugin::output_definitions(&postgres::graphs(), &mut out);
    }

    let source = SqlxStatistics::connect(&args.connection)?;
    let mut plugin = Plugin::new(PostgresCollector::new(source), args.tempfile.clone());
    let result = plugin.run(mode, Utc::now().timestamp(), &mut out);
    if let Err(e) = plugin.into_inner().into_inner().close() {
        warn!("could not close connection: {}", e);
    }
    result
}

fn main() {
    let matches = config::postgres_app().get_matches();
    let args = match config::postgres_args(&matches) {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(2);
        }
    };
    if let Err(e) = logging::init(args.verbose) {
        eprintln!("could not set up logging: {}", e);
    }

    if let Err(e) = run(Mode::from_env(), &args) {
        error!("{}", e);
        process::exit(1);
    }
}
