extern crate clap;
use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use rpkv::{Config, KvStore};
use std::process;
use tracing::debug;
use tracing_subscriber::EnvFilter;

fn main() -> color_eyre::Result<()> {
    setup()?;

    let m = App::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("path")
                .short("p")
                .long("path")
                .takes_value(true)
                .value_name("PATH")
                .help("Log file or directory (defaults to $RPKV_PATH, then ./rpkv.db)"),
        )
        .subcommand(SubCommand::with_name("locate").about("Print the path of the log file"))
        .subcommand(
            SubCommand::with_name("get")
                .about("Get value")
                .help("rpkv get <key> -- Get the value of the key in parameter")
                .arg(Arg::with_name("key").required(true).index(1)),
        )
        .subcommand(
            SubCommand::with_name("put")
                .about("Store a value")
                .help("rpkv put <key> <value> -- Store the value under the key")
                .arg(Arg::with_name("key").required(true).index(1))
                .arg(Arg::with_name("value").required(true).index(2)),
        )
        .subcommand(SubCommand::with_name("compact").about("Drop overwritten records from the log"))
        .get_matches();

    if let Err(err) = run(&m) {
        eprintln!("{}", err);
        process::exit(1);
    }
    Ok(())
}

fn run(m: &ArgMatches) -> rpkv::Result<()> {
    let mut config = Config::from_env()?;
    if let Some(path) = m.value_of("path") {
        config = config.with_path(path);
    }
    let store = KvStore::open_with(config)?;

    match m.subcommand() {
        ("locate", _) => println!("{}", store.locate().display()),
        ("get", Some(sub)) => {
            let key = sub.value_of("key").unwrap_or_default();
            match store.get(key)? {
                Some(value) => println!("{}", value),
                None => {
                    debug!("{:?} is absent", key);
                    println!("Key not found")
                }
            }
        }
        ("put", Some(sub)) => {
            let key = sub.value_of("key").unwrap_or_default();
            let value = sub.value_of("value").unwrap_or_default();
            store.put(key.to_owned(), value.to_owned())?;
            println!("{}", value);
        }
        ("compact", _) => store.compact()?,
        _ => unreachable!("clap requires a subcommand"),
    }
    Ok(())
}

fn setup() -> color_eyre::Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "1")
    }
    color_eyre::install()?;

    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn")
    }
    tracing_subscriber::fmt::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
