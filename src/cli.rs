// src/cli.rs

use clap::{value_parser, Arg, ArgAction, Command};

fn urls_arg() -> Arg {
    Arg::new("urls")
        .help("Video URLs to append to the playlist")
        .value_name("URL")
        .num_args(1..)
        .index(1)
}

/// Build the command-line interface for the application
pub fn build_cli() -> Command {
    Command::new("playcache")
        .version(crate::VERSION)
        .about("Cache playlist videos locally and play them back in order")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("root")
                .long("root")
                .short('r')
                .help("Working directory downloads land in")
                .value_name("DIRECTORY")
                .global(true),
        )
        .arg(
            Arg::new("cache-dir")
                .long("cache-dir")
                .help("Name of the cache subdirectory inside the root")
                .value_name("NAME")
                .global(true),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Path to a JSON config file")
                .value_name("FILE")
                .global(true),
        )
        .arg(
            Arg::new("playlist")
                .long("playlist")
                .short('p')
                .help("Load playlist URLs from a file (JSON array or one URL per line)")
                .value_name("FILE")
                .global(true),
        )
        .arg(
            Arg::new("samples")
                .long("samples")
                .help("Start with the built-in sample playlist")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("list")
                .about("Show the playlist with cache status")
                .arg(urls_arg()),
        )
        .subcommand(Command::new("status").about("Rescan the cache directory and summarize"))
        .subcommand(
            Command::new("cache")
                .about("Download playlist entries into the cache")
                .arg(urls_arg())
                .arg(
                    Arg::new("index")
                        .long("index")
                        .short('i')
                        .help("Only cache the entry at this playlist index (repeatable)")
                        .value_name("INDEX")
                        .value_parser(value_parser!(usize))
                        .action(ArgAction::Append),
                ),
        )
        .subcommand(
            Command::new("play")
                .about("Play cached entries in order, wrapping around at the end")
                .arg(
                    Arg::new("start")
                        .long("start")
                        .short('s')
                        .help("Playlist index to start from")
                        .value_name("INDEX")
                        .value_parser(value_parser!(usize))
                        .default_value("0"),
                ),
        )
        .subcommand(Command::new("clear").about("Delete every file in the cache directory"))
}
