//! Template, model and parser steps composed into handlers, keyword routing and parallel fan-out.

use std::collections::BTreeMap;

use futures::future::join_all;
use itertools::Itertools;
use log::{debug, info, warn};

use crate::{
    error::{ChainError, ChainResult},
    model::ChatModel,
    template::{ChatTemplate, Request},
};

/// Turns raw model text into the handler's result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputParser {
    /// Plain text with surrounding whitespace removed
    #[default]
    Text,
    /// One item per non-empty line, list bullets stripped, rejoined with newlines
    Lines,
}

impl OutputParser {
    pub fn parse(&self, text: &str) -> String {
        match self {
            OutputParser::Text => text.trim().to_string(),
            OutputParser::Lines => text
                .lines()
                .map(|l| l.trim().trim_start_matches(['-', '*', '•']).trim())
                .filter(|l| !l.is_empty())
                .join("\n"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Handler {
    pub template: ChatTemplate,
    pub parser: OutputParser,
}

impl Handler {
    pub fn new(template: ChatTemplate) -> Self {
        Self {
            template,
            parser: OutputParser::default(),
        }
    }

    pub fn system_human(system: &str, human: &str) -> ChainResult<Self> {
        Ok(Self::new(ChatTemplate::system_human(system, human)?))
    }

    pub fn with_parser(self, parser: OutputParser) -> Self {
        Self { parser, ..self }
    }

    pub async fn invoke(&self, model: &dyn ChatModel, request: &Request) -> ChainResult<String> {
        let messages = self.template.format_messages(request)?;
        let reply = model.invoke(&messages).await?;
        Ok(self.parser.parse(reply.text()))
    }
}

#[derive(Clone, Debug)]
pub struct BranchRule {
    pub name: String,
    pub triggers: Vec<String>,
    pub handler: Handler,
}

impl BranchRule {
    pub fn new<S: Into<String>>(
        name: &str,
        triggers: impl IntoIterator<Item = S>,
        handler: Handler,
    ) -> Self {
        Self {
            name: name.to_string(),
            triggers: triggers.into_iter().map(Into::into).collect(),
            handler,
        }
    }

    /// Literal, case sensitive substring test.
    pub fn matches(&self, text: &str) -> bool {
        self.triggers.iter().any(|t| text.contains(t.as_str()))
    }
}

/// Picks the first rule whose triggers appear in `field`, falling back to `default`.
///
/// Rule order decides ties, so it is part of the deployment's configuration.
#[derive(Clone, Debug)]
pub struct BranchSelector {
    pub field: String,
    pub rules: Vec<BranchRule>,
    pub default: (String, Handler),
}

impl BranchSelector {
    pub fn select(&self, request: &Request) -> (&str, &Handler) {
        let text = request.get(&self.field).map(String::as_str).unwrap_or_default();

        self.rules
            .iter()
            .find(|rule| rule.matches(text))
            .map(|rule| (rule.name.as_str(), &rule.handler))
            .unwrap_or((self.default.0.as_str(), &self.default.1))
    }

    pub async fn invoke(
        &self,
        model: &dyn ChatModel,
        request: &Request,
    ) -> ChainResult<(String, String)> {
        let (branch, handler) = self.select(request);
        info!("Routing to {branch} branch");
        let reply = handler.invoke(model, request).await?;
        Ok((branch.to_string(), reply))
    }
}

pub type AnalysisResult = BTreeMap<String, ChainResult<String>>;

/// Runs every dimension against the same request. One dimension failing leaves the others intact.
#[derive(Clone, Debug)]
pub struct ParallelAnalyzer {
    pub dimensions: Vec<(String, Handler)>,
}

impl ParallelAnalyzer {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.dimensions.iter().map(|(k, _)| k.as_str())
    }

    pub async fn analyze(&self, model: &dyn ChatModel, request: &Request) -> AnalysisResult {
        let tasks = self.dimensions.iter().map(|(name, handler)| async move {
            debug!("Starting {name} analysis");
            let result = handler.invoke(model, request).await;
            if let Err(err) = &result {
                warn!("Analysis dimension {name} failed: {err}");
            }
            (name.clone(), result)
        });

        join_all(tasks).await.into_iter().collect()
    }
}

pub const COMPLAINT_TRIGGERS: [&str; 5] = ["投訴", "抱怨", "不滿意", "糟糕", "差勁"];
pub const REFUND_TRIGGERS: [&str; 5] = ["退貨", "換貨", "退款", "退錢", "不想要"];
pub const INQUIRY_TRIGGERS: [&str; 5] = ["價格", "功能", "規格", "如何使用", "怎麼用"];

/// Complaint, refund and inquiry routes checked in that order, general questions otherwise.
pub fn customer_service() -> ChainResult<BranchSelector> {
    let complaint = Handler::system_human(
        "你是專業的客服人員，處理客戶投訴。請保持同理心，提供解決方案。",
        "客戶投訴：{question}",
    )?;
    let inquiry = Handler::system_human(
        "你是專業的客服人員，回答產品諮詢。請提供詳細且準確的資訊。",
        "客戶諮詢：{question}",
    )?;
    let refund = Handler::system_human(
        "你是專業的客服人員，處理退換貨請求。請說明退換貨流程和注意事項。",
        "退換貨請求：{question}",
    )?;
    let general = Handler::system_human(
        "你是友善的客服人員，回答一般問題。",
        "客戶問題：{question}",
    )?;

    Ok(BranchSelector {
        field: "question".into(),
        rules: vec![
            BranchRule::new("complaint", COMPLAINT_TRIGGERS, complaint),
            BranchRule::new("refund", REFUND_TRIGGERS, refund),
            BranchRule::new("inquiry", INQUIRY_TRIGGERS, inquiry),
        ],
        default: ("general".into(), general),
    })
}

pub fn validate_question(question: &str) -> ChainResult<()> {
    if question.trim().is_empty() {
        return Err(ChainError::Parse("請輸入您的問題".into()));
    }
    Ok(())
}

pub const DIMENSIONS: [&str; 4] = ["sentiment", "keywords", "audience", "improvement"];

pub fn content_analysis() -> ChainResult<ParallelAnalyzer> {
    let prompts = [
        (
            "你是情感分析專家。請分析文本的情感傾向（正面、負面、中性），並給出1-10分的情感分數。",
            "分析這段文本的情感：\n{content}",
        ),
        (
            "你是關鍵字提取專家。請提取文本中的5-10個重要關鍵字，並說明為什麼這些關鍵字重要。",
            "提取這段文本的關鍵字：\n{content}",
        ),
        (
            "你是受眾分析專家。請分析這段文本的目標受眾（年齡層、興趣、職業等）。",
            "分析這段文本的目標受眾：\n{content}",
        ),
        (
            "你是內容優化專家。請提供3-5個具體的改善建議，讓內容更吸引人。",
            "提供這段文本的改善建議：\n{content}",
        ),
    ];

    let dimensions = DIMENSIONS
        .into_iter()
        .zip(prompts)
        .map(|(name, (system, human))| Ok((name.to_string(), Handler::system_human(system, human)?)))
        .collect::<ChainResult<_>>()?;

    Ok(ParallelAnalyzer { dimensions })
}

pub fn validate_content(content: &str) -> ChainResult<()> {
    if content.trim().is_empty() {
        return Err(ChainError::Parse("請輸入要分析的內容".into()));
    }
    if content.chars().count() < 10 {
        return Err(ChainError::Parse("內容太短，請至少輸入 10 個字".into()));
    }
    Ok(())
}
