//! Ready-made writing pipelines.
//!
//! Every factory builds fresh steps from a [`PipelineConfig`], so two runs
//! never share agents or state.

use crate::generate::GenerateStep;
use crate::loop_workflow::LoopWorkflow;
use crate::settings::{Settings, SettingsError};
use crate::tool_step::{ToolErrorMode, ToolStep};
use crate::workflow::SequentialWorkflow;
use std::sync::Arc;
use tsuzuri_core::{ExitTool, Generator, RetryPolicy, Tool, WorkflowError};

/// What every generation step of a pipeline is built with.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Backend shared by every generation step.
    pub generator: Arc<dyn Generator>,
    /// Applied to every generation call.
    pub retry_policy: RetryPolicy,
    /// Iteration limit of each refinement loop.
    pub max_refinement_iterations: u32,
    /// Reply a critic gives when no further changes are needed.
    pub approval_phrase: String,
}

impl PipelineConfig {
    /// Two refinement iterations, the Gemini retry preset and `APPROVED` as
    /// the approval phrase.
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            retry_policy: RetryPolicy::gemini_default(),
            max_refinement_iterations: 2,
            approval_phrase: "APPROVED".to_string(),
        }
    }

    /// Takes the retry policy and loop settings from `settings`.
    pub fn from_settings(
        generator: Arc<dyn Generator>,
        settings: &Settings,
    ) -> Result<Self, SettingsError> {
        Ok(Self {
            generator,
            retry_policy: settings.retry_policy()?,
            max_refinement_iterations: settings.pipeline.max_refinement_iterations,
            approval_phrase: settings.pipeline.approval_phrase.clone(),
        })
    }

    /// Overrides the retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Overrides the refinement loop limit.
    pub fn with_max_refinement_iterations(mut self, iterations: u32) -> Self {
        self.max_refinement_iterations = iterations;
        self
    }

    fn agent(&self, name: &str) -> crate::generate::GenerateStepBuilder {
        GenerateStep::builder(name, self.generator.clone()).retry_policy(self.retry_policy.clone())
    }
}

/// Outline, draft and edit a blog post about `topic`.
///
/// Writes `outline`, `blog_draft` and `final_blog`.
pub fn blog_pipeline(config: &PipelineConfig) -> Result<SequentialWorkflow, WorkflowError> {
    let outline = config
        .agent("outline_agent")
        .instruction(
            "You are a technical content planner. Create a structured outline for a blog post \
             on the following topic, with a title, an introduction, 3-5 main sections with \
             2-3 key points each, and a conclusion.\n\nTopic: {topic}",
        )
        .input("topic")
        .output("outline")
        .build()?;

    let writer = config
        .agent("writer_agent")
        .instruction(
            "You are a technical blog writer. Write a complete post in Markdown that follows \
             this outline exactly, with short code examples where they help.\n\nOutline:\n{outline}",
        )
        .input("outline")
        .output("blog_draft")
        .build()?;

    let editor = config
        .agent("editor_agent")
        .instruction(
            "You are a technical editor. Fix grammar, clarity and flow in this draft without \
             changing its meaning. Output only the final post.\n\nDraft:\n{blog_draft}",
        )
        .input("blog_draft")
        .output("final_blog")
        .build()?;

    SequentialWorkflow::builder("blog_pipeline")
        .step(outline)
        .step(writer)
        .step(editor)
        .build()
}

fn subtitle_step(subtitles: Arc<dyn Tool>) -> Result<ToolStep, WorkflowError> {
    Ok(
        ToolStep::new("subtitle_fetch", subtitles, ["reference_url"], "transcript")?
            .with_error_mode(ToolErrorMode::AsData),
    )
}

/// Plan, research, draft and critique a YouTube script.
///
/// Expects `request` and `reference_url` in the initial state. The critic
/// answers with the approval phrase when the script is done, and the rewriter
/// then calls the exit function to end the refinement loop.
pub fn youtube_script_pipeline(
    config: &PipelineConfig,
    subtitles: Arc<dyn Tool>,
) -> Result<SequentialWorkflow, WorkflowError> {
    let manager = config
        .agent("manager")
        .instruction(
            "You are a YouTube content manager. Turn this request into concrete video \
             requirements: topic, audience, tone, length and key messages.\n\nRequest: {request}",
        )
        .input("request")
        .output("video_requirements")
        .build()?;

    let researcher = config
        .agent("researcher")
        .instruction(
            "You are a research assistant for video scripts. Using the requirements and the \
             reference video's transcript, gather facts, examples and statistics the script \
             should use. If the transcript is an error, rely on the requirements alone.\n\n\
             Requirements:\n{video_requirements}\n\nReference transcript:\n{transcript}",
        )
        .inputs(["video_requirements", "transcript"])
        .output("research_data")
        .build()?;

    let initial_writer = config
        .agent("initial_writer")
        .instruction(
            "You are a YouTube script writer. Write a complete first script with hook, \
             sections and call to action, based on this research.\n\nResearch:\n{research_data}",
        )
        .input("research_data")
        .output("final_script")
        .build()?;

    let critique = config
        .agent("critique")
        .instruction(format!(
            "You are a script critic. Check the script against the research for accuracy, \
             pacing and engagement. If it needs no changes reply with exactly '{}'; otherwise \
             list concrete improvements.\n\nResearch:\n{{research_data}}\n\nScript:\n{{final_script}}",
            config.approval_phrase
        ))
        .inputs(["research_data", "final_script"])
        .output("critique_feedback")
        .build()?;

    let rewriter = config
        .agent("script_rewriter")
        .instruction(format!(
            "You are a script editor. If the feedback is exactly '{}', call the exit_loop \
             function and output nothing. Otherwise rewrite the script applying every point \
             of the feedback and output the full script.\n\nScript:\n{{final_script}}\n\n\
             Feedback:\n{{critique_feedback}}",
            config.approval_phrase
        ))
        .inputs(["final_script", "critique_feedback"])
        .output("final_script")
        .exit_tool(ExitTool::default())
        .build()?;

    let feedback_loop = LoopWorkflow::builder("feedback_loop")
        .step(critique)
        .step(rewriter)
        .max_iterations(config.max_refinement_iterations)
        .exit_on("script_rewriter")
        .build()?;

    SequentialWorkflow::builder("youtube_script_pipeline")
        .step(manager)
        .step(subtitle_step(subtitles)?)
        .step(researcher)
        .step(initial_writer)
        .looping(feedback_loop)
        .build()
}

/// A shorter YouTube pipeline: one strategy step, one draft, then a
/// self-refining loop.
pub fn youtube_script_lite_pipeline(
    config: &PipelineConfig,
    subtitles: Arc<dyn Tool>,
) -> Result<SequentialWorkflow, WorkflowError> {
    let strategy = config
        .agent("strategy")
        .instruction(
            "You are a YouTube strategist and researcher. From the request and the reference \
             transcript, produce a research package: audience, angle, outline and supporting \
             facts.\n\nRequest: {request}\n\nReference transcript:\n{transcript}",
        )
        .inputs(["request", "transcript"])
        .output("research_package")
        .build()?;

    let writer = config
        .agent("writer")
        .instruction(
            "You are a YouTube script writer. Write the full script described by this research \
             package.\n\nResearch package:\n{research_package}",
        )
        .input("research_package")
        .output("final_script")
        .build()?;

    let refiner = config
        .agent("refiner")
        .instruction(
            "You are a script editor. Improve the script so it matches the research package. \
             If it already needs no changes, call the exit_loop function and output nothing; \
             otherwise output the full improved script.\n\nScript:\n{final_script}\n\n\
             Research package:\n{research_package}",
        )
        .inputs(["final_script", "research_package"])
        .output("final_script")
        .exit_tool(ExitTool::default())
        .build()?;

    let refinement = LoopWorkflow::builder("refinement_loop")
        .step(refiner)
        .max_iterations(config.max_refinement_iterations)
        .exit_on("refiner")
        .build()?;

    SequentialWorkflow::builder("youtube_script_lite_pipeline")
        .step(subtitle_step(subtitles)?)
        .step(strategy)
        .step(writer)
        .looping(refinement)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tsuzuri_core::{
        BackendError, GenerateRequest, GenerateResponse, SharedState, StateKey,
        TerminationSignal, ToolArgs, ToolResult,
    };

    #[derive(Debug)]
    struct Echo;

    #[async_trait]
    impl Generator for Echo {
        async fn generate(
            &self,
            request: &GenerateRequest,
        ) -> Result<GenerateResponse, BackendError> {
            Ok(GenerateResponse::text(format!("{} chars", request.prompt.len())))
        }
    }

    #[derive(Debug)]
    struct NoSubtitles;

    #[async_trait]
    impl Tool for NoSubtitles {
        fn name(&self) -> &str {
            "get_subtitles"
        }

        fn parameters(&self) -> &[&'static str] {
            &["url"]
        }

        async fn invoke(&self, _args: &ToolArgs) -> ToolResult {
            ToolResult::error("No subtitles found")
        }
    }

    fn config() -> PipelineConfig {
        PipelineConfig::new(Arc::new(Echo)).with_retry_policy(RetryPolicy::no_retry())
    }

    fn keys(names: &[&str]) -> Vec<StateKey> {
        names.iter().map(|k| StateKey::new(*k)).collect()
    }

    #[tokio::test]
    async fn test_blog_pipeline_writes_every_stage() {
        let workflow = blog_pipeline(&config()).expect("valid pipeline");
        assert_eq!(
            workflow.required_inputs().into_iter().collect::<Vec<_>>(),
            keys(&["topic"])
        );

        let report = workflow
            .run(Some(SharedState::new().with("topic", "Rust lifetimes")))
            .await
            .expect("pipeline runs");

        for key in ["outline", "blog_draft", "final_blog"] {
            assert!(report.state.contains_key(key), "missing {}", key);
        }
        assert!(report.completions.is_empty());
    }

    #[tokio::test]
    async fn test_youtube_pipeline_exhausts_without_approval() {
        let workflow = youtube_script_pipeline(&config(), Arc::new(NoSubtitles))
            .expect("valid pipeline");
        assert_eq!(
            workflow.required_inputs().into_iter().collect::<Vec<_>>(),
            keys(&["reference_url", "request"])
        );

        let initial = SharedState::new()
            .with("request", "A video about sourdough")
            .with("reference_url", "https://youtu.be/eC8mZceIy5k");
        let report = workflow.run(Some(initial)).await.expect("pipeline runs");

        let completion = report.completion("feedback_loop").expect("loop ran");
        assert!(!completion.is_approved());
        assert_eq!(completion.iterations, 2);
        assert_eq!(
            report.state.get_text("transcript"),
            Ok(r#"{"status":"error","message":"No subtitles found"}"#)
        );
        assert!(report.state.contains_key("critique_feedback"));
    }

    /// Critic approves at once; the rewriter exits when it sees the approval.
    #[derive(Debug)]
    struct ApprovingModel;

    #[async_trait]
    impl Generator for ApprovingModel {
        async fn generate(
            &self,
            request: &GenerateRequest,
        ) -> Result<GenerateResponse, BackendError> {
            let prompt = &request.prompt;
            Ok(if prompt.starts_with("You are a script critic") {
                GenerateResponse::text("APPROVED")
            } else if prompt.ends_with("Feedback:\nAPPROVED") && request.exit_tool.is_some() {
                GenerateResponse {
                    text: String::new(),
                    signal: Some(TerminationSignal::approved("Script approved.")),
                }
            } else {
                GenerateResponse::text("first script")
            })
        }
    }

    #[tokio::test]
    async fn test_rewriter_ends_feedback_loop_after_approval() {
        let config =
            PipelineConfig::new(Arc::new(ApprovingModel)).with_retry_policy(RetryPolicy::no_retry());
        let workflow =
            youtube_script_pipeline(&config, Arc::new(NoSubtitles)).expect("valid pipeline");

        let initial = SharedState::new()
            .with("request", "A video about sourdough")
            .with("reference_url", "https://youtu.be/eC8mZceIy5k");
        let report = workflow.run(Some(initial)).await.expect("pipeline runs");

        let completion = report.completion("feedback_loop").expect("loop ran");
        assert!(completion.is_approved());
        assert_eq!(completion.iterations, 1);
        assert_eq!(
            completion.signal,
            Some(TerminationSignal::approved("Script approved."))
        );
        assert_eq!(report.state.get_text("critique_feedback"), Ok("APPROVED"));
        assert_eq!(report.state.get_text("final_script"), Ok("first script"));
    }

    #[test]
    fn test_lite_pipeline_requires_request_and_url() {
        let workflow = youtube_script_lite_pipeline(&config(), Arc::new(NoSubtitles))
            .expect("valid pipeline");
        assert_eq!(
            workflow.required_inputs().into_iter().collect::<Vec<_>>(),
            keys(&["reference_url", "request"])
        );
    }

    #[test]
    fn test_zero_iterations_rejected() {
        let result = youtube_script_lite_pipeline(
            &config().with_max_refinement_iterations(0),
            Arc::new(NoSubtitles),
        );
        assert!(matches!(result, Err(WorkflowError::Configuration(_))));
    }
}
