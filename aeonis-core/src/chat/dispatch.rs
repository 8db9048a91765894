//! Multi-turn tool dispatch
//!
//! ```text
//! AwaitingModelResponse -> ExecutingTools -> SendingResults -> AwaitingModelResponse
//!          |
//!          +-> Done (no tool invocation, no candidate, or turn limit)
//! ```

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::prompts::{render_system_prompt, PromptContext};
use super::{CompletionEngine, CompletionRequest, Message, ToolInvocation, ToolResult};
use crate::tools::{declarations, ToolContext, ToolDeclaration, ToolSession};
use crate::Result;

/// Returned when the model produced no candidate at all
pub const FALLBACK_MESSAGE: &str =
    "I'm sorry, I couldn't generate a response. Please try rephrasing your question.";

/// Returned when the conversation exceeds the turn limit
pub const TURN_LIMIT_MESSAGE: &str =
    "I could not complete this request within the allowed number of steps.";

/// Default number of model calls per conversation
pub const DEFAULT_MAX_TURNS: usize = 10;

/// Where the conversation loop currently is
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchState {
    AwaitingModelResponse,
    /// Invocations from the last model turn, in issue order
    ExecutingTools(Vec<ToolInvocation>),
    /// Results of one turn, sent back together
    SendingResults(Vec<ToolResult>),
    /// Final answer text
    Done(String),
}

impl DispatchState {
    pub fn is_done(&self) -> bool {
        matches!(self, DispatchState::Done(_))
    }
}

/// Final outcome of a conversation
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    /// Number of completion engine calls made
    pub model_calls: usize,
    /// Number of tool invocations executed
    pub tool_calls: usize,
    pub history: Vec<Message>,
}

/// Drives conversations between a completion engine and the tool catalogue
pub struct Dispatcher {
    engine: Arc<dyn CompletionEngine>,
    tools: Arc<ToolContext>,
    declarations: Vec<ToolDeclaration>,
    instructions: Option<String>,
    max_turns: usize,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("tools", &self.tools)
            .field("max_turns", &self.max_turns)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(engine: Arc<dyn CompletionEngine>, tools: Arc<ToolContext>) -> Self {
        Self {
            engine,
            tools,
            declarations: declarations(),
            instructions: None,
            max_turns: DEFAULT_MAX_TURNS,
        }
    }

    /// Replace the built-in system instructions
    ///
    /// `{{PROJECT_ID}}` in the template is replaced with the conversation's project.
    pub fn with_instructions(mut self, template: impl Into<String>) -> Self {
        self.instructions = Some(template.into());
        self
    }

    /// Bound the number of model calls per conversation
    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Answer a single question about `project_id`
    pub async fn ask(&self, project_id: &str, question: &str) -> Result<Answer> {
        self.converse(project_id, vec![Message::user(question)]).await
    }

    /// Continue a conversation until the model answers without tools
    ///
    /// Tool failures never end the loop; only completion engine errors do.
    pub async fn converse(&self, project_id: &str, mut history: Vec<Message>) -> Result<Answer> {
        let system = render_system_prompt(
            self.instructions.as_deref(),
            &PromptContext::new().with_project(project_id),
        );
        let mut session = ToolSession::new(Arc::clone(&self.tools), project_id);

        let mut model_calls = 0;
        let mut tool_calls = 0;
        let mut state = DispatchState::AwaitingModelResponse;

        loop {
            state = match state {
                DispatchState::AwaitingModelResponse => {
                    if model_calls >= self.max_turns {
                        warn!(project_id, max_turns = self.max_turns, "Turn limit reached");
                        DispatchState::Done(TURN_LIMIT_MESSAGE.to_string())
                    } else {
                        model_calls += 1;
                        let request = CompletionRequest {
                            system: &system,
                            tools: &self.declarations,
                            history: &history,
                        };

                        match self.engine.complete(request).await? {
                            None => {
                                warn!(project_id, "Model returned no candidate");
                                DispatchState::Done(FALLBACK_MESSAGE.to_string())
                            }
                            Some(message) => {
                                let calls: Vec<ToolInvocation> =
                                    message.tool_calls().into_iter().cloned().collect();
                                let text = message.text();
                                history.push(message);

                                if calls.is_empty() {
                                    DispatchState::Done(text)
                                } else {
                                    DispatchState::ExecutingTools(calls)
                                }
                            }
                        }
                    }
                }
                DispatchState::ExecutingTools(calls) => {
                    debug!(project_id, count = calls.len(), "Executing tool calls");
                    let mut results = Vec::with_capacity(calls.len());
                    for call in &calls {
                        results.push(session.run(call).await);
                    }
                    tool_calls += results.len();
                    DispatchState::SendingResults(results)
                }
                DispatchState::SendingResults(results) => {
                    history.push(Message::tool_results(results));
                    DispatchState::AwaitingModelResponse
                }
                DispatchState::Done(text) => {
                    info!(project_id, model_calls, tool_calls, "Conversation complete");
                    return Ok(Answer {
                        text,
                        model_calls,
                        tool_calls,
                        history,
                    });
                }
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{Part, Role};
    use crate::git::RepoCache;
    use crate::scanner::StaticScanner;
    use crate::test_support::{CountingScanner, FakeStore, FakeSync, FakeTraceStore, PanickingScanner};
    use crate::Error;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Debug, Clone)]
    struct SeenRequest {
        system: String,
        tool_count: usize,
        history: Vec<Message>,
    }

    /// Completion engine replaying a fixed script
    #[derive(Default)]
    struct ScriptedEngine {
        script: Mutex<VecDeque<Result<Option<Message>>>>,
        /// Answer repeated once the script runs out
        repeat: Option<Message>,
        seen: Mutex<Vec<SeenRequest>>,
    }

    impl ScriptedEngine {
        fn new(script: Vec<Result<Option<Message>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                ..Default::default()
            }
        }

        fn repeating(message: Message) -> Self {
            Self {
                repeat: Some(message),
                ..Default::default()
            }
        }

        fn seen(&self) -> Vec<SeenRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionEngine for ScriptedEngine {
        async fn complete(&self, request: CompletionRequest<'_>) -> Result<Option<Message>> {
            self.seen.lock().unwrap().push(SeenRequest {
                system: request.system.to_string(),
                tool_count: request.tools.len(),
                history: request.history.to_vec(),
            });

            match self.script.lock().unwrap().pop_front() {
                Some(next) => next,
                None => match &self.repeat {
                    Some(message) => Ok(Some(message.clone())),
                    None => Err(Error::Completion("script exhausted".to_string())),
                },
            }
        }
    }

    fn calls(invocations: &[(&str, serde_json::Value)]) -> Message {
        Message {
            role: Role::Model,
            parts: invocations
                .iter()
                .map(|(name, args)| {
                    Part::ToolCall(ToolInvocation {
                        name: name.to_string(),
                        args: args.clone(),
                    })
                })
                .collect(),
        }
    }

    struct Harness {
        _temp: TempDir,
        sync: Arc<FakeSync>,
        traces: Arc<FakeTraceStore>,
        tools: Arc<ToolContext>,
    }

    fn harness() -> Harness {
        harness_with_scanner(Arc::new(CountingScanner::default()))
    }

    fn harness_with_scanner(scanner: Arc<dyn StaticScanner>) -> Harness {
        let temp = TempDir::new().unwrap();
        let sync = Arc::new(FakeSync::new());
        let traces = Arc::new(FakeTraceStore::default());
        let cache = RepoCache::new(
            temp.path().join("repos"),
            Arc::new(FakeStore::with_public(&["p1"])),
            sync.clone(),
        );
        let tools = Arc::new(ToolContext {
            cache: Arc::new(cache),
            traces: traces.clone(),
            scanner,
        });

        Harness {
            _temp: temp,
            sync,
            traces,
            tools,
        }
    }

    #[tokio::test]
    async fn test_text_only_turn_is_returned_verbatim() {
        let h = harness();
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(Some(Message::model(
            "  There are **no** errors.\n",
        )))]));
        let dispatcher = Dispatcher::new(engine.clone(), h.tools.clone());

        let answer = dispatcher.ask("p1", "Any errors?").await.unwrap();

        assert_eq!(answer.text, "  There are **no** errors.\n");
        assert_eq!(answer.model_calls, 1);
        assert_eq!(answer.tool_calls, 0);
        assert_eq!(h.sync.clones.load(Ordering::SeqCst), 0);

        let seen = engine.seen();
        assert_eq!(seen[0].tool_count, 9);
        assert!(seen[0].system.contains("project `p1`"));
        assert_eq!(seen[0].history, vec![Message::user("Any errors?")]);
    }

    #[tokio::test]
    async fn test_results_of_one_turn_are_batched() {
        let h = harness();
        let engine = Arc::new(ScriptedEngine::new(vec![
            Ok(Some(calls(&[
                ("list_branches", json!({})),
                ("query_spans", json!({"project_id": "other-tenant", "errors_only": true})),
            ]))),
            Ok(Some(Message::model("The payment span failed on main."))),
        ]));
        let dispatcher = Dispatcher::new(engine.clone(), h.tools.clone());

        let answer = dispatcher.ask("p1", "Why did checkout fail?").await.unwrap();

        assert_eq!(answer.text, "The payment span failed on main.");
        assert_eq!(answer.model_calls, 2);
        assert_eq!(answer.tool_calls, 2);
        assert_eq!(answer.history.len(), 4);

        let seen = engine.seen();
        assert_eq!(seen.len(), 2);
        let results = &seen[1].history[2];
        assert_eq!(results.role, Role::User);
        assert_eq!(results.parts.len(), 2);
        match (&results.parts[0], &results.parts[1]) {
            (Part::ToolResult(branches), Part::ToolResult(spans)) => {
                assert_eq!(branches.name, "list_branches");
                assert!(branches.response["branches"].as_array().unwrap().contains(&json!("main")));
                assert_eq!(spans.name, "query_spans");
                assert_eq!(spans.response["count"], 1);
            }
            other => panic!("unexpected parts: {:?}", other),
        }

        let queries = h.traces.queries.lock().unwrap().clone();
        assert_eq!(queries[0].project_id, "p1");
        assert!(queries[0].errors_only);
    }

    #[tokio::test]
    async fn test_tool_failures_do_not_abort_the_loop() {
        let h = harness();
        let engine = Arc::new(ScriptedEngine::new(vec![
            Ok(Some(calls(&[
                ("execute_sql_query", json!({"query": "SELECT 1"})),
                ("get_commit_diff", json!({})),
            ]))),
            Ok(Some(Message::model("I could not run those tools."))),
        ]));
        let dispatcher = Dispatcher::new(engine.clone(), h.tools.clone());

        let answer = dispatcher.ask("p1", "Diff?").await.unwrap();
        assert_eq!(answer.text, "I could not run those tools.");

        let seen = engine.seen();
        let kinds: Vec<_> = seen[1].history[2]
            .parts
            .iter()
            .map(|part| match part {
                Part::ToolResult(result) => result.response["error"]["kind"].clone(),
                other => panic!("unexpected part: {:?}", other),
            })
            .collect();
        assert_eq!(kinds, vec![json!("unknown_tool"), json!("invalid_arguments")]);
    }

    #[tokio::test]
    async fn test_panicking_tool_becomes_error_result() {
        let h = harness_with_scanner(Arc::new(PanickingScanner));
        let engine = Arc::new(ScriptedEngine::new(vec![
            Ok(Some(calls(&[("analyze_code_with_semgrep", json!({}))]))),
            Ok(Some(Message::model("The scanner is not working right now."))),
        ]));
        let dispatcher = Dispatcher::new(engine.clone(), h.tools.clone());

        let answer = dispatcher.ask("p1", "Any vulnerabilities?").await.unwrap();
        assert_eq!(answer.text, "The scanner is not working right now.");
        assert_eq!(answer.tool_calls, 1);

        let seen = engine.seen();
        match &seen[1].history[2].parts[0] {
            Part::ToolResult(result) => {
                assert_eq!(result.name, "analyze_code_with_semgrep");
                assert_eq!(result.response["error"]["kind"], "tool_execution_error");
                assert!(result.response["error"]["message"]
                    .as_str()
                    .unwrap()
                    .contains("scanner crashed"));
            }
            other => panic!("unexpected part: {:?}", other),
        }

        // The working copy was put back on main and stays usable
        let follow_up = Arc::new(ScriptedEngine::new(vec![
            Ok(Some(calls(&[("list_branches", json!({}))]))),
            Ok(Some(Message::model("done"))),
        ]));
        Dispatcher::new(follow_up.clone(), h.tools.clone())
            .ask("p1", "Branches?")
            .await
            .unwrap();
        match &follow_up.seen()[1].history[2].parts[0] {
            Part::ToolResult(result) => assert!(result.response.get("error").is_none()),
            other => panic!("unexpected part: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_candidate_returns_fallback() {
        let h = harness();
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(None)]));
        let dispatcher = Dispatcher::new(engine, h.tools.clone());

        let answer = dispatcher.ask("p1", "Hello").await.unwrap();
        assert_eq!(answer.text, FALLBACK_MESSAGE);
    }

    #[tokio::test]
    async fn test_turn_limit_ends_conversation() {
        let h = harness();
        let engine = Arc::new(ScriptedEngine::repeating(calls(&[("list_branches", json!({}))])));
        let dispatcher = Dispatcher::new(engine.clone(), h.tools.clone()).with_max_turns(3);

        let answer = dispatcher.ask("p1", "Loop forever").await.unwrap();

        assert_eq!(answer.text, TURN_LIMIT_MESSAGE);
        assert_eq!(answer.model_calls, 3);
        assert_eq!(answer.tool_calls, 3);
        assert_eq!(engine.seen().len(), 3);
        assert_eq!(h.sync.clones.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_engine_error_is_propagated() {
        let h = harness();
        let engine = Arc::new(ScriptedEngine::new(vec![Err(Error::Completion(
            "rate limited".to_string(),
        ))]));
        let dispatcher = Dispatcher::new(engine, h.tools.clone());

        let result = dispatcher.ask("p1", "Hello").await;
        assert!(matches!(result, Err(Error::Completion(_))));
    }

    #[tokio::test]
    async fn test_custom_instructions_are_rendered() {
        let h = harness();
        let engine = Arc::new(ScriptedEngine::new(vec![Ok(Some(Message::model("ok")))]));
        let dispatcher = Dispatcher::new(engine.clone(), h.tools.clone())
            .with_instructions("Only talk about {{PROJECT_ID}}.");

        dispatcher.ask("p1", "Hi").await.unwrap();
        assert_eq!(engine.seen()[0].system, "Only talk about p1.");
    }

    #[test]
    fn test_done_state() {
        assert!(DispatchState::Done(String::new()).is_done());
        assert!(!DispatchState::AwaitingModelResponse.is_done());
    }
}
