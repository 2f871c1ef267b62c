mod config_error;

use clap::{Arg, ArgAction, Command};
use std::error::Error;
use std::fs;
use std::time::Duration;

use humantime;

pub use config_error::ConfigError;

#[derive(Debug, Clone)]
pub struct Config {
    pub admin_tokens: Vec<String>,
    pub connect_timeout: Duration,
    pub listen_host: String,
    pub listen_port: i32,
    pub log_dir: String,
    pub log_level: usize,
    pub metadata_floor: Duration,
    pub probe_timeout: Duration,
    pub rate_limit: u32,
    pub rate_limit_window: Duration,
    pub threads: usize,
    pub useragent: String,
}

fn get_option_string(
    matches: &clap::ArgMatches,
    config: &toml::Value,
    setting_name: &str,
    default_value: String,
) -> Result<String, Box<dyn Error>> {
    let value_from_clap: Option<&String> = matches.get_one(setting_name);
    if let Some(value_from_clap) = value_from_clap {
        return Ok(value_from_clap.to_string());
    }

    let setting = config.get(setting_name);
    if let Some(setting) = setting {
        if setting.is_str() {
            let setting_decoded = setting.as_str();
            if let Some(setting_decoded) = setting_decoded {
                return Ok(String::from(setting_decoded));
            }
        } else {
            return Err(Box::new(ConfigError::TypeError(
                setting_name.into(),
                setting.to_string(),
            )));
        }
    }

    Ok(default_value)
}

fn get_option_duration(
    matches: &clap::ArgMatches,
    config: &toml::Value,
    setting_name: &str,
    default_value: String,
) -> Result<Duration, Box<dyn Error>> {
    let s = get_option_string(matches, config, setting_name, default_value)?;
    Ok(s.parse::<humantime::Duration>()?.into())
}

fn get_option_number(
    matches: &clap::ArgMatches,
    config: &toml::Value,
    setting_name: &str,
    default_value: i64,
) -> Result<i64, Box<dyn Error>> {
    let value_from_clap: Option<&String> = matches.get_one(setting_name);
    if let Some(value_from_clap) = value_from_clap {
        return Ok(value_from_clap.to_string().parse()?);
    }

    let setting = config.get(setting_name);
    if let Some(setting) = setting {
        if setting.is_integer() {
            let setting_decoded = setting.as_integer();
            if let Some(setting_decoded) = setting_decoded {
                return Ok(setting_decoded);
            }
        } else {
            return Err(Box::new(ConfigError::TypeError(
                setting_name.into(),
                setting.to_string(),
            )));
        }
    }

    Ok(default_value)
}

fn get_option_number_occurences(
    matches: &clap::ArgMatches,
    config: &toml::Value,
    setting_name: &str,
    default_value: usize,
) -> Result<usize, Box<dyn Error>> {
    let value_from_clap = matches.get_count(setting_name) as usize;
    if value_from_clap > 0 {
        return Ok(value_from_clap);
    }

    let setting = config.get(setting_name);
    if let Some(setting) = setting {
        if setting.is_integer() {
            let setting_decoded = setting.as_integer();
            if let Some(setting_decoded) = setting_decoded {
                return Ok(setting_decoded as usize);
            }
        } else {
            return Err(Box::new(ConfigError::TypeError(
                setting_name.into(),
                setting.to_string(),
            )));
        }
    }

    Ok(default_value)
}

fn get_option_list(
    matches: &clap::ArgMatches,
    config: &toml::Value,
    setting_name: &str,
) -> Result<Vec<String>, Box<dyn Error>> {
    let value_from_clap: Option<&String> = matches.get_one(setting_name);
    if let Some(value_from_clap) = value_from_clap {
        return Ok(value_from_clap
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect());
    }

    let mut list = vec![];
    let setting = config.get(setting_name);
    if let Some(setting) = setting {
        let setting_decoded = setting.as_array().ok_or(Box::new(ConfigError::TypeError(
            setting_name.into(),
            setting.to_string(),
        )))?;
        for item in setting_decoded {
            let item_str = item.as_str().ok_or(Box::new(ConfigError::TypeError(
                setting_name.into(),
                item.to_string(),
            )))?;
            list.push(item_str.to_string());
        }
    }
    Ok(list)
}

pub fn load_config() -> Result<Config, Box<dyn Error>> {
    let matches = Command::new("streamprobe")
        .version(clap::crate_version!())
        .about("HTTP Rest API for radio stream connectivity tests")
        .arg(
            Arg::new("config-file")
                .short('f')
                .long("config-file")
                .value_name("CONFIG-FILE")
                .help("Path to config file")
                .env("CONFIG_FILE")
                .default_value("/etc/streamprobe.toml"),
        )
        .arg(
            Arg::new("log-dir")
                .short('l')
                .long("log-dir")
                .value_name("LOG-DIR")
                .help("Path to log dir")
                .env("LOG_DIR"),
        )
        .arg(
            Arg::new("listen-host")
                .long("host")
                .value_name("HOST")
                .help("listening host ip")
                .env("HOST"),
        )
        .arg(
            Arg::new("listen-port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("listening port")
                .env("PORT"),
        )
        .arg(
            Arg::new("threads")
                .short('t')
                .long("threads")
                .value_name("THREADS")
                .help("concurrent threads used by socket")
                .env("THREADS"),
        )
        .arg(
            Arg::new("log-level")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .help("increases the log level. can be specified mutliple times 0..3"),
        )
        .arg(
            Arg::new("useragent")
                .long("useragent")
                .value_name("USERAGENT")
                .help("user agent value for http requests")
                .env("USERAGENT"),
        )
        .arg(
            Arg::new("probe-timeout")
                .long("probe-timeout")
                .value_name("PROBE_TIMEOUT")
                .help("overall ceiling for a single stream connection test")
                .env("PROBE_TIMEOUT"),
        )
        .arg(
            Arg::new("connect-timeout")
                .long("connect-timeout")
                .value_name("CONNECT_TIMEOUT")
                .help("tcp connect timeout for outgoing probes")
                .env("CONNECT_TIMEOUT"),
        )
        .arg(
            Arg::new("metadata-floor")
                .long("metadata-floor")
                .value_name("METADATA_FLOOR")
                .help("minimum time budget for metadata extraction")
                .env("METADATA_FLOOR"),
        )
        .arg(
            Arg::new("rate-limit")
                .long("rate-limit")
                .value_name("RATE_LIMIT")
                .help("allowed stream tests per caller per window")
                .env("RATE_LIMIT"),
        )
        .arg(
            Arg::new("rate-limit-window")
                .long("rate-limit-window")
                .value_name("RATE_LIMIT_WINDOW")
                .help("rate limit window size")
                .env("RATE_LIMIT_WINDOW"),
        )
        .arg(
            Arg::new("admin-tokens")
                .long("admin-tokens")
                .value_name("ADMIN_TOKENS")
                .help("comma separated list of accepted admin bearer tokens")
                .env("ADMIN_TOKENS"),
        )
        .get_matches();

    let config_file_path: String = matches
        .get_one::<String>("config-file")
        .map(|s| s.to_string())
        .unwrap_or_default();

    // missing config file is fine, flags and env vars still apply
    let config = match fs::read_to_string(&config_file_path) {
        Ok(contents) => toml::from_str::<toml::Value>(&contents)?,
        Err(_) => toml::Value::Table(toml::map::Map::new()),
    };

    let log_dir: String = get_option_string(&matches, &config, "log-dir", String::from("."))?;
    let listen_host: String =
        get_option_string(&matches, &config, "listen-host", String::from("127.0.0.1"))?;
    let listen_port: i32 = get_option_number(&matches, &config, "listen-port", 8080)? as i32;
    let threads: usize = get_option_number(&matches, &config, "threads", 1)? as usize;
    let log_level: usize = get_option_number_occurences(&matches, &config, "log-level", 0)?;

    let useragent = get_option_string(
        &matches,
        &config,
        "useragent",
        String::from("streamprobe/0.3"),
    )?;
    let probe_timeout = get_option_duration(&matches, &config, "probe-timeout", String::from("10secs"))?;
    let connect_timeout =
        get_option_duration(&matches, &config, "connect-timeout", String::from("5secs"))?;
    let metadata_floor =
        get_option_duration(&matches, &config, "metadata-floor", String::from("3secs"))?;
    let rate_limit: u32 = get_option_number(&matches, &config, "rate-limit", 10)? as u32;
    let rate_limit_window =
        get_option_duration(&matches, &config, "rate-limit-window", String::from("1min"))?;
    let admin_tokens = get_option_list(&matches, &config, "admin-tokens")?;

    Ok(Config {
        admin_tokens,
        connect_timeout,
        listen_host,
        listen_port,
        log_dir,
        log_level,
        metadata_floor,
        probe_timeout,
        rate_limit,
        rate_limit_window,
        threads,
        useragent,
    })
}
