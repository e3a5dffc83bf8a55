use anyhow::Result;
use std::env;

pub(crate) struct Args {
    pub(crate) config_file: String,
    pub(crate) admin_addr: Option<String>,
    pub(crate) meta_store_addr: Option<String>,
}

impl Args {
    fn show_usage() {
        println!("Autothrottle Service Usage:");
        println!("  --config-file        Path to config file (required)");
        println!("  --admin-addr         Admin API listen address (overrides config)");
        println!("  --meta-store-addr    Coordination store (etcd) address (overrides config)");
    }

    pub(crate) fn parse() -> Result<Self> {
        let args: Vec<String> = env::args().collect();

        if args.len() <= 1 {
            Self::show_usage();
            return Err(anyhow::anyhow!("No arguments provided"));
        }

        let mut config_file = None;
        let mut admin_addr = None;
        let mut meta_store_addr = None;

        let mut args_iter = args.iter().skip(1);
        while let Some(arg) = args_iter.next() {
            match arg.as_str() {
                "--config-file" => {
                    config_file = args_iter.next().map(|s| s.to_string());
                }
                "--admin-addr" => {
                    admin_addr = args_iter.next().map(|s| s.to_string());
                }
                "--meta-store-addr" => {
                    meta_store_addr = args_iter.next().map(|s| s.to_string());
                }
                other => {
                    Self::show_usage();
                    return Err(anyhow::anyhow!("Unknown argument: {}", other));
                }
            }
        }

        let config_file = match config_file {
            Some(path) => path,
            None => {
                Self::show_usage();
                return Err(anyhow::anyhow!("--config-file is required"));
            }
        };

        Ok(Args {
            config_file,
            admin_addr,
            meta_store_addr,
        })
    }
}
