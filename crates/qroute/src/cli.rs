//! CLI (Command Line Interface) mode
//!
//! Interactive REPL over the router, plus the one-shot `--query` mode.
//! The conversation history lives here and is passed to every call.

use nu_ansi_term::{Color, Style};
use qroute_core::{Message, QueryRouter, RouteResult, RouteStatus};
use reedline::{
    ColumnarMenu, Completer, DefaultHinter, Emacs, KeyCode, KeyModifiers, Keybindings,
    MenuBuilder, Prompt, Reedline, ReedlineEvent, ReedlineMenu, Signal, Suggestion,
};
use tracing::info;

/// User id attached to CLI requests
const CLI_USER: &str = "cli";

/// Available commands for autocomplete display
const COMMANDS: &[(&str, &str)] = &[
    ("/help", "ヘルプを表示"),
    ("/exit", "プログラムを終了"),
    ("/clear", "会話履歴をクリア"),
    ("/history", "会話履歴を表示"),
    ("/log", "直前のリクエストの実行ログを表示"),
];

/// Command completer for reedline
#[derive(Clone)]
pub struct CommandCompleter {
    commands: Vec<(&'static str, &'static str)>,
}

impl CommandCompleter {
    pub fn new() -> Self {
        Self {
            commands: COMMANDS.to_vec(),
        }
    }
}

impl Default for CommandCompleter {
    fn default() -> Self {
        Self::new()
    }
}

impl Completer for CommandCompleter {
    fn complete(&mut self, line: &str, pos: usize) -> Vec<Suggestion> {
        if !line.starts_with('/') {
            return Vec::new();
        }

        self.commands
            .iter()
            .filter(|(cmd, _)| cmd.starts_with(line))
            .map(|(cmd, desc)| Suggestion {
                value: cmd.to_string(),
                description: Some(desc.to_string()),
                extra: None,
                span: reedline::Span::new(0, pos),
                append_whitespace: true,
                style: None,
            })
            .collect()
    }
}

/// Prompt showing the route of the previous answer
struct RoutePrompt {
    style: Style,
    last_route: Option<String>,
}

impl RoutePrompt {
    fn new() -> Self {
        Self {
            style: Color::Cyan.bold(),
            last_route: None,
        }
    }
}

impl Prompt for RoutePrompt {
    fn render_prompt_left(&self) -> std::borrow::Cow<'_, str> {
        std::borrow::Cow::Owned(self.style.paint("> ").to_string())
    }

    fn render_prompt_right(&self) -> std::borrow::Cow<'_, str> {
        match &self.last_route {
            Some(route) => std::borrow::Cow::Owned(Style::new().dimmed().paint(route).to_string()),
            None => std::borrow::Cow::Borrowed(""),
        }
    }

    fn render_prompt_indicator(&self, _prompt_mode: reedline::PromptEditMode) -> std::borrow::Cow<'_, str> {
        std::borrow::Cow::Borrowed("")
    }

    fn render_prompt_multiline_indicator(&self) -> std::borrow::Cow<'_, str> {
        std::borrow::Cow::Borrowed("")
    }

    fn render_prompt_history_search_indicator(
        &self,
        _history_search: reedline::PromptHistorySearch,
    ) -> std::borrow::Cow<'_, str> {
        std::borrow::Cow::Borrowed("")
    }
}

/// Outcome of a slash command
enum Command {
    Handled,
    Exit,
    NotACommand,
}

/// Conversation kept by the REPL
#[derive(Default)]
struct Session {
    messages: Vec<Message>,
    last_result: Option<RouteResult>,
}

/// Run one query and print the response (or the JSON result)
pub async fn run_query(router: &QueryRouter, query: &str, json: bool) -> anyhow::Result<()> {
    let query = query.trim();
    if query.is_empty() {
        return Err(anyhow::anyhow!("クエリが空です"));
    }

    let result = router.route_and_execute(query, &[], CLI_USER).await;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", result.response);
    }

    match result.status {
        RouteStatus::Timeout | RouteStatus::Error => {
            Err(anyhow::anyhow!("request finished with status {}", result.status))
        }
        _ => Ok(()),
    }
}

/// Run CLI interactive mode
pub async fn run_cli(router: QueryRouter) -> anyhow::Result<()> {
    info!(
        "Starting CLI mode with {} responders",
        router.engine().registry().len()
    );

    print_welcome();

    let mut keybindings = default_keybindings();

    // Trigger completion on '/' key
    keybindings.add_binding(
        KeyModifiers::NONE,
        KeyCode::Char('/'),
        ReedlineEvent::Edit(vec![reedline::EditCommand::Complete]),
    );

    let menu = Box::new(
        ColumnarMenu::default()
            .with_name("command_menu")
            .with_columns(1)
            .with_column_width(Some(40))
            .with_only_buffer_difference(false),
    );

    let hinter = DefaultHinter::default().with_style(Style::new().dimmed());

    let mut line_editor = Reedline::create()
        .with_completer(Box::new(CommandCompleter::new()))
        .with_menu(ReedlineMenu::EngineCompleter(menu))
        .with_hinter(Box::new(hinter))
        .with_edit_mode(Box::new(Emacs::new(keybindings)));

    let mut prompt = RoutePrompt::new();
    let mut session = Session::default();

    loop {
        let signal = line_editor.read_line(&prompt);

        match signal {
            Ok(Signal::Success(line)) => {
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }

                match handle_command(input, &mut session) {
                    Command::Handled => continue,
                    Command::Exit => break,
                    Command::NotACommand => {}
                }

                let result = router
                    .route_and_execute(input, &session.messages, CLI_USER)
                    .await;

                print_result(&result);

                session.messages.push(Message::user(input));
                session.messages.push(Message::assistant(result.response.as_str()));
                prompt.last_route = result.route_taken.map(|r| r.to_string());
                session.last_result = Some(result);
            }
            Ok(Signal::CtrlC) => {
                println!("^C");
                continue;
            }
            Ok(Signal::CtrlD) => {
                println!("\n👋 さようなら！\n");
                break;
            }
            Err(err) => {
                eprintln!("\n❌ エラー: {}\n", err);
                break;
            }
        }
    }

    Ok(())
}

/// Default keybindings for reedline
fn default_keybindings() -> Keybindings {
    let mut keybindings = Keybindings::new();
    keybindings.add_binding(
        KeyModifiers::NONE,
        KeyCode::Tab,
        ReedlineEvent::Edit(vec![reedline::EditCommand::Complete]),
    );
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Enter, ReedlineEvent::Submit);
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Esc, ReedlineEvent::Esc);
    keybindings.add_binding(KeyModifiers::CONTROL, KeyCode::Char('c'), ReedlineEvent::CtrlC);
    keybindings.add_binding(KeyModifiers::CONTROL, KeyCode::Char('d'), ReedlineEvent::CtrlD);
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Up, ReedlineEvent::Up);
    keybindings.add_binding(KeyModifiers::NONE, KeyCode::Down, ReedlineEvent::Down);
    keybindings
}

/// Handle special commands (/exit, /clear, /help, /history, /log)
fn handle_command(input: &str, session: &mut Session) -> Command {
    let lower = input.to_lowercase();

    match lower.as_str() {
        "/exit" | "/quit" | "/q" => {
            println!("\n👋 さようなら！\n");
            Command::Exit
        }
        "/clear" => {
            session.messages.clear();
            session.last_result = None;
            println!("\n✅ 会話履歴をクリアしました。\n");
            Command::Handled
        }
        "/help" | "/?" => {
            print_help();
            Command::Handled
        }
        "/history" => {
            print_history(&session.messages);
            Command::Handled
        }
        "/log" => {
            match &session.last_result {
                Some(result) => print_log(result),
                None => println!("\nまだリクエストがありません。\n"),
            }
            Command::Handled
        }
        _ if lower.starts_with('/') => {
            eprintln!(
                "\n❓ 不明なコマンド: {}。/help でコマンド一覧を確認してください。\n",
                input
            );
            Command::Handled
        }
        _ => Command::NotACommand,
    }
}

fn print_result(result: &RouteResult) {
    println!("\n{}\n", result.response);

    let route = result
        .route_taken
        .map(|r| r.to_string())
        .unwrap_or_else(|| "-".to_string());
    let mut summary = format!("{} · {} · {}ms", route, result.status, result.processing_time_ms);
    if !result.responders_used.is_empty() {
        summary.push_str(&format!(" · {}", result.responders_used.join(", ")));
    }

    let style = match result.status {
        RouteStatus::Success => Style::new().dimmed(),
        RouteStatus::Partial | RouteStatus::Degraded => Color::Yellow.normal(),
        RouteStatus::Timeout | RouteStatus::Error => Color::Red.normal(),
    };
    println!("{}\n", style.paint(summary));
}

fn print_welcome() {
    println!();
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║          🧭 qroute CLI - 対話モード                        ║");
    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║  メッセージを入力して Enter で送信                          ║");
    println!("║  コマンド: /help, /exit, /clear, /history, /log            ║");
    println!("║  / を入力するとコマンド候補が表示されます                   ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
}

fn print_help() {
    println!();
    println!("📖 利用可能なコマンド:");
    for (cmd, desc) in COMMANDS {
        println!("  {} - {}", cmd, desc);
    }
    println!();
    println!("💡 ヒント: / から入力するとコマンド候補が表示されます");
    println!();
}

/// Print conversation history
fn print_history(messages: &[Message]) {
    println!();
    println!("📜 会話履歴 ({} 件):", messages.len());
    println!("{}", "─".repeat(50));

    for (i, msg) in messages.iter().enumerate() {
        let role = match msg.role.as_str() {
            "user" => "👤 あなた",
            "assistant" => "🧭 qroute",
            other => other,
        };
        println!("{}. {}: {}", i + 1, role, preview(msg.text_content(), 100));
    }

    println!("{}", "─".repeat(50));
    println!();
}

/// Print the execution log of a routed request
fn print_log(result: &RouteResult) {
    println!();
    println!("🪵 実行ログ: {} ({})", result.request_id, result.status);
    println!("{}", "─".repeat(50));

    for entry in result.execution_log.iter() {
        let outcome = match entry.outcome.as_str() {
            "success" => Color::Green.paint("success"),
            other => Color::Red.paint(other),
        };
        println!("{:<28} {:>6}ms  {}", entry.stage, entry.duration_ms, outcome);
    }

    println!("{}", "─".repeat(50));
    println!("合計: {}ms", result.processing_time_ms);
    println!();
}

/// First `max_chars` characters of `text` on one line
fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() > max_chars {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}...", cut)
    } else {
        flat
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completer_filters_by_prefix() {
        let mut completer = CommandCompleter::new();
        let suggestions = completer.complete("/h", 2);
        let values: Vec<_> = suggestions.iter().map(|s| s.value.as_str()).collect();
        assert_eq!(values, vec!["/help", "/history"]);
        assert!(completer.complete("hello", 5).is_empty());
    }

    #[test]
    fn test_clear_resets_session() {
        let mut session = Session {
            messages: vec![Message::user("hi"), Message::assistant("hello")],
            last_result: None,
        };
        assert!(matches!(handle_command("/clear", &mut session), Command::Handled));
        assert!(session.messages.is_empty());
        assert!(matches!(handle_command("/EXIT", &mut session), Command::Exit));
        assert!(matches!(handle_command("hi there", &mut session), Command::NotACommand));
    }

    #[test]
    fn test_preview_is_char_safe() {
        assert_eq!(preview("안녕하세요", 2), "안녕...");
        assert_eq!(preview("a\nb", 10), "a b");
    }
}
