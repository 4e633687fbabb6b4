fn main() {
    let route = match handle_cli_flags() {
        CliAction::Exit => return,
        CliAction::Run(route) => route,
    };

    if let Err(err) = ledit::run(route) {
        eprintln!("error: {err:?}");
        std::process::exit(1);
    }
}

enum CliAction {
    Exit,
    Run(Option<String>),
}

fn handle_cli_flags() -> CliAction {
    let mut saw_flag = false;
    let mut route = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("ledit {}", ledit::VERSION);
                saw_flag = true;
            }
            "--help" | "-h" => {
                println!(
                    "ledit - Read Reddit, Hacker News, Mastodon, RSS and YouTube feeds in the terminal.\n\nUsage: ledit [ROUTE]\n\n  ROUTE                r/rust, r/rust/top-week, hn/new, m/user@host, rss/<url>, yt/<channel>\n  --version, -V        Show version and exit\n  --help,    -h        Show this help message"
                );
                saw_flag = true;
            }
            other if other.starts_with('-') => {
                eprintln!("unknown flag: {other}");
                std::process::exit(2);
            }
            other => {
                if route.is_none() {
                    route = Some(other.to_string());
                }
            }
        }
    }
    if saw_flag {
        CliAction::Exit
    } else {
        CliAction::Run(route)
    }
}
