//! 대화형 모드 - 감독 세션 하나로 여러 명령 실행

use crate::cli::{self, Request};
use pokedex_core::PokedexService;
use pokedex_foundation::PokedexConfig;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_TYPE_LIMIT: usize = 10;

const HELP: &str = "\
Commands:
  lookup <name>           cached lookup
  search <name>           live upstream lookup
  cached                  list cached Pokemon
  type <type> [limit]     Pokemon of a type (default limit 10)
  compare <a> <b>         side-by-side comparison
  status                  tool process status
  help                    this text
  quit                    leave (also Ctrl-D / Ctrl-C)";

/// 파싱된 입력 줄
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplInput {
    Request(Request),
    Help,
    Quit,
    Empty,
}

impl ReplInput {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(Self::Empty);
        };
        let rest: Vec<&str> = words.collect();

        let request = match command.to_lowercase().as_str() {
            "help" | "?" => return Ok(Self::Help),
            "quit" | "exit" => return Ok(Self::Quit),
            "lookup" | "get" => Request::Lookup(joined_name(command, &rest)?),
            "search" => Request::Search(joined_name(command, &rest)?),
            "cached" | "list" => Request::Cached,
            "status" => Request::Status,
            "type" => match rest.as_slice() {
                [type_name] => Request::Type {
                    type_name: type_name.to_string(),
                    limit: DEFAULT_TYPE_LIMIT,
                },
                [type_name, limit] => Request::Type {
                    type_name: type_name.to_string(),
                    limit: limit
                        .parse()
                        .map_err(|_| format!("Invalid limit: {}", limit))?,
                },
                _ => return Err("usage: type <type> [limit]".to_string()),
            },
            "compare" => match rest.as_slice() {
                [first, second] => Request::Compare {
                    first: first.to_string(),
                    second: second.to_string(),
                },
                _ => return Err("usage: compare <a> <b>".to_string()),
            },
            other => return Err(format!("Unknown command: {} (try `help`)", other)),
        };

        Ok(Self::Request(request))
    }
}

/// 이름에 공백 허용 ("mr mime"), 정규화는 캐시가 담당
fn joined_name(command: &str, rest: &[&str]) -> Result<String, String> {
    if rest.is_empty() {
        return Err(format!("usage: {} <name>", command));
    }
    Ok(rest.join(" "))
}

fn prompt() {
    print!("pokedex> ");
    let _ = std::io::stdout().flush();
}

pub async fn run(config: &PokedexConfig) -> anyhow::Result<()> {
    let session = cli::open_session(config);
    // connect while the user types
    session.ensure_started();
    let service = PokedexService::new(Arc::clone(&session));

    println!("Pokedex interactive session. Type `help` for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        prompt();

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            println!();
            break;
        };

        match ReplInput::parse(&line) {
            Ok(ReplInput::Empty) => {}
            Ok(ReplInput::Quit) => break,
            Ok(ReplInput::Help) => println!("{}", HELP),
            Ok(ReplInput::Request(request)) => {
                tokio::select! {
                    (document, _) = cli::execute(&service, request) => {
                        println!("{}", cli::render(&document));
                    }
                    _ = tokio::signal::ctrl_c() => println!("\nInterrupted"),
                }
            }
            Err(message) => eprintln!("{}", message),
        }
    }

    session.shutdown().await;
    Ok(())
}
