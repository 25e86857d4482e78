//! Research, analysis and writing agents run one after another on a topic.

use std::fmt;

use chrono::NaiveDateTime;
use indoc::formatdoc;
use log::info;
use serde::Serialize;
use thiserror::Error;

use crate::{
    agent::{AgentBudget, AgentExecutor, DynAgent},
    config::Config,
    report::format_research_report,
    tools::{AnalyzeData, FormatReport, SearchInformation, ToolRegistry},
};

const RESEARCH_ITERATIONS: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Research,
    Analysis,
    Writing,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Research => "研究",
            Stage::Analysis => "分析",
            Stage::Writing => "撰寫",
        })
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("{stage}階段失敗")]
    Stage {
        stage: Stage,
        #[source]
        source: anyhow::Error,
    },
}

impl WorkflowError {
    pub fn stage(&self) -> Stage {
        match self {
            WorkflowError::Stage { stage, .. } => *stage,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkflowReport {
    pub topic: String,
    pub research: String,
    pub analysis: String,
    pub final_report: String,
}

impl WorkflowReport {
    pub fn render(&self, at: NaiveDateTime) -> String {
        format_research_report(&self.topic, &self.final_report, at)
    }
}

pub struct ResearchWorkflow {
    pub researcher: Box<dyn DynAgent>,
    pub analyst: Box<dyn DynAgent>,
    pub writer: Box<dyn DynAgent>,
}

impl ResearchWorkflow {
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let budget = AgentBudget::from_config(config)?.with_iterations(RESEARCH_ITERATIONS);
        let stage = |preamble: &str, tools: ToolRegistry| -> anyhow::Result<Box<dyn DynAgent>> {
            Ok(Box::new(AgentExecutor::new(config, preamble, &tools, budget)?))
        };

        Ok(Self {
            researcher: stage(
                "你是研究員，負責搜尋和收集資訊。",
                ToolRegistry::default().with(SearchInformation),
            )?,
            analyst: stage(
                "你是分析師，負責分析和整理資訊。",
                ToolRegistry::default().with(AnalyzeData),
            )?,
            writer: stage(
                "你是撰寫者，負責生成最終報告。",
                ToolRegistry::default().with(FormatReport),
            )?,
        })
    }

    /// Each stage sees the output of the one before it. The first failure ends the run.
    pub async fn run(&self, topic: &str) -> Result<WorkflowReport, WorkflowError> {
        let fail = |stage| move |source| WorkflowError::Stage { stage, source };

        info!("Research stage for {topic}");
        let research = self
            .researcher
            .prompt(&format!("搜尋關於「{topic}」的詳細資訊"))
            .await
            .map_err(fail(Stage::Research))?;

        info!("Analysis stage for {topic}");
        let analysis = self
            .analyst
            .prompt(&format!("分析以下資料並提取關鍵要點：\n{research}"))
            .await
            .map_err(fail(Stage::Analysis))?;

        let combined = formatdoc!(
            "
            主題：{}

            研究發現：
            {}

            分析結果：
            {}

            結論：
            基於以上研究和分析，我們對「{}」有了全面的了解。
            這些資訊可以幫助我們更好地理解相關概念和應用。",
            topic,
            research,
            analysis,
            topic
        );

        info!("Writing stage for {topic}");
        let final_report = self
            .writer
            .prompt(&format!("將以下內容格式化成專業報告：\n{combined}"))
            .await
            .map_err(fail(Stage::Writing))?;

        Ok(WorkflowReport {
            topic: topic.to_string(),
            research,
            analysis,
            final_report,
        })
    }
}
