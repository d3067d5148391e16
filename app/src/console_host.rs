use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use qtools_core::connection::Connection;
use qtools_core::explorer::ExplorerTree;
use qtools_core::export::ExportFormat;
use qtools_core::host::{Host, InputRequest, PickRequest, StatusIndicator};
use qtools_core::rpc::ResultSet;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};

/// Typed at an input prompt to dismiss it.
pub const CANCEL_INPUT: &str = "\\q";

type LineSource = Lines<Box<dyn AsyncBufRead + Send + Unpin>>;

/// `Host` over stdin/stdout for driving the session without an editor.
pub struct ConsoleHost {
    input: tokio::sync::Mutex<LineSource>,
    /// Held for a whole pick/input/save exchange so concurrent prompts never interleave.
    prompt: tokio::sync::Mutex<()>,
    /// Masked input goes through the terminal instead of the line source.
    terminal: bool,
    registered: Mutex<BTreeSet<String>>,
    current_results: Mutex<Option<Vec<ResultSet>>>,
    export_dir: PathBuf,
}

impl ConsoleHost {
    #[must_use]
    pub fn new(export_dir: PathBuf) -> Self {
        let mut host = Self::from_reader(BufReader::new(tokio::io::stdin()), export_dir);
        host.terminal = true;
        host
    }

    /// Scripted host reading every answer, masked ones included, from `reader`.
    #[must_use]
    pub fn from_reader(
        reader: impl AsyncBufRead + Send + Unpin + 'static,
        export_dir: PathBuf,
    ) -> Self {
        let reader: Box<dyn AsyncBufRead + Send + Unpin> = Box::new(reader);
        Self {
            input: tokio::sync::Mutex::new(reader.lines()),
            prompt: tokio::sync::Mutex::new(()),
            terminal: false,
            registered: Mutex::new(BTreeSet::new()),
            current_results: Mutex::new(None),
            export_dir,
        }
    }

    /// Next stdin line, `None` at end of input.
    pub async fn read_line(&self) -> Option<String> {
        match self.input.lock().await.next_line().await {
            Ok(line) => line,
            Err(error) => {
                tracing::warn!(%error, "failed to read stdin");
                None
            }
        }
    }

    /// Reads without echo from the controlling terminal. Without one, stdin
    /// is not a terminal either and the answer comes from the line source.
    async fn read_masked(&self, label: String) -> Option<String> {
        let prompt = format!("{label} ");
        match tokio::task::spawn_blocking(move || rpassword::prompt_password(prompt)).await {
            Ok(Ok(answer)) => Some(answer),
            Ok(Err(error)) => {
                tracing::debug!(%error, "no terminal for masked input");
                println!("{label}");
                self.read_line().await
            }
            Err(error) => {
                tracing::warn!(%error, "password prompt task failed");
                None
            }
        }
    }

    #[must_use]
    pub fn registered_commands(&self) -> Vec<String> {
        self.registered
            .lock()
            .map(|registered| registered.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Host for ConsoleHost {
    fn register_command(&self, qualified_name: &str) {
        if let Ok(mut registered) = self.registered.lock() {
            registered.insert(qualified_name.to_string());
        }
    }

    fn unregister_command(&self, qualified_name: &str) {
        if let Ok(mut registered) = self.registered.lock() {
            registered.remove(qualified_name);
        }
    }

    fn set_status(&self, status: &StatusIndicator) {
        println!("[{}]", status.text);
    }

    fn hide_status(&self) {}

    fn show_results(&self, connection: &Connection, results: &[ResultSet]) {
        for result in results {
            println!("-- {} @ {}", result.query, connection.name);
            print!("{}", render_result_set(result));
        }
        if let Ok(mut current) = self.current_results.lock() {
            *current = Some(results.to_vec());
        }
    }

    fn current_results(&self) -> Option<Vec<ResultSet>> {
        self.current_results
            .lock()
            .ok()
            .and_then(|current| current.clone())
    }

    fn refresh_explorer(&self, tree: &ExplorerTree) {
        for node in tree.nodes() {
            tracing::debug!(
                connection = %node.connection.id,
                connected = node.is_connected(),
                tables = node.tables.len(),
                "explorer node"
            );
        }
    }

    fn show_info(&self, message: &str) {
        println!("{message}");
    }

    fn show_error(&self, message: &str, offer_logs: bool) {
        if offer_logs {
            eprintln!("error: {message} (run with QTOOLS_LOG=debug for details)");
        } else {
            eprintln!("error: {message}");
        }
    }

    async fn pick(&self, request: PickRequest) -> Option<usize> {
        let _prompt = self.prompt.lock().await;
        println!("{}", request.title);
        for (index, item) in request.items.iter().enumerate() {
            match &item.detail {
                Some(detail) => println!("  {}) {}  {detail}", index + 1, item.label),
                None => println!("  {}) {}", index + 1, item.label),
            }
        }
        println!("number (empty to cancel):");
        let answer = self.read_line().await?;
        parse_pick_answer(&answer, request.items.len())
    }

    async fn input(&self, request: InputRequest) -> Option<String> {
        let _prompt = self.prompt.lock().await;
        loop {
            let label = prompt_label(&request);
            let answer = if request.masked && self.terminal {
                self.read_masked(label).await?
            } else {
                println!("{label}");
                self.read_line().await?
            };
            if answer == CANCEL_INPUT {
                return None;
            }
            match request.check(&answer) {
                Some(message) => eprintln!("{message}"),
                None => return Some(answer),
            }
        }
    }

    async fn save_location(&self, format: ExportFormat) -> Option<PathBuf> {
        let _prompt = self.prompt.lock().await;
        let default_path = self
            .export_dir
            .join(format!("results.{}", format.extension()));
        println!("save to ({}):", default_path.display());
        let answer = self.read_line().await?;
        let answer = answer.trim();
        if answer == CANCEL_INPUT {
            return None;
        }
        Some(if answer.is_empty() {
            default_path
        } else {
            PathBuf::from(answer)
        })
    }
}

fn prompt_label(request: &InputRequest) -> String {
    match &request.placeholder {
        Some(placeholder) => format!("{} ({placeholder}):", request.prompt),
        None => format!("{}:", request.prompt),
    }
}

/// 1-based choice; anything else dismisses the picker.
fn parse_pick_answer(answer: &str, items: usize) -> Option<usize> {
    let choice = answer.trim().parse::<usize>().ok()?;
    (1..=items).contains(&choice).then(|| choice - 1)
}

fn render_result_set(result: &ResultSet) -> String {
    let mut output = String::new();
    for message in &result.messages {
        output.push_str(message);
        output.push('\n');
    }
    if result.cols.is_empty() {
        return output;
    }

    output.push_str(&result.cols.join(" | "));
    output.push('\n');
    for row in &result.results {
        let cells: Vec<String> = result
            .cols
            .iter()
            .map(|column| match row.get(column) {
                None | Some(Value::Null) => "NULL".to_string(),
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        output.push_str(&cells.join(" | "));
        output.push('\n');
    }
    output.push_str(&format!("({} rows)\n", result.results.len()));
    output
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use qtools_core::host::{require_non_empty, Host, InputRequest, PickItem, PickRequest};
    use qtools_core::rpc::ResultSet;
    use serde_json::json;

    use super::{parse_pick_answer, prompt_label, render_result_set, ConsoleHost};

    fn scripted(answers: &'static str) -> ConsoleHost {
        ConsoleHost::from_reader(answers.as_bytes(), PathBuf::from("/tmp"))
    }

    #[test]
    fn prompt_label_names_the_target() {
        let request = InputRequest::new("local password")
            .with_placeholder("127.0.0.1")
            .masked();
        assert_eq!(prompt_label(&request), "local password (127.0.0.1):");
        assert_eq!(prompt_label(&InputRequest::new("Query")), "Query:");
    }

    #[tokio::test]
    async fn concurrent_prompts_are_answered_in_turn() {
        let host = scripted("\nalpha\nbeta\n");
        let first = InputRequest::new("A password")
            .masked()
            .validated_by(require_non_empty);
        let second = InputRequest::new("B password")
            .masked()
            .validated_by(require_non_empty);

        let (a, b) = tokio::join!(host.input(first), host.input(second));

        assert_eq!(a.as_deref(), Some("alpha"));
        assert_eq!(b.as_deref(), Some("beta"));
    }

    #[tokio::test]
    async fn cancel_token_dismisses_input() {
        let host = scripted("\\q\n");
        assert_eq!(host.input(InputRequest::new("Query")).await, None);
    }

    #[tokio::test]
    async fn end_of_input_dismisses_pick() {
        let host = scripted("");
        let request = PickRequest {
            title: "Select a connection".to_string(),
            items: vec![PickItem::new("local")],
        };
        assert_eq!(host.pick(request).await, None);
    }

    #[test]
    fn pick_answers_are_one_based_and_bounded() {
        assert_eq!(parse_pick_answer("1", 3), Some(0));
        assert_eq!(parse_pick_answer(" 3 ", 3), Some(2));
        assert_eq!(parse_pick_answer("0", 3), None);
        assert_eq!(parse_pick_answer("4", 3), None);
        assert_eq!(parse_pick_answer("", 3), None);
    }

    #[test]
    fn renders_rows_in_column_order() {
        let result: ResultSet = serde_json::from_value(json!({
            "query": "select id, name from users",
            "cols": ["id", "name"],
            "results": [{"name": "ada", "id": 1}, {"id": 2, "name": null}],
        }))
        .expect("valid result set");

        assert_eq!(
            render_result_set(&result),
            "id | name\n1 | ada\n2 | NULL\n(2 rows)\n"
        );
    }

    #[test]
    fn renders_messages_without_columns() {
        let result: ResultSet = serde_json::from_value(json!({
            "query": "update users set name = 'x'",
            "messages": ["3 rows affected"],
        }))
        .expect("valid result set");

        assert_eq!(render_result_set(&result), "3 rows affected\n");
    }
}
