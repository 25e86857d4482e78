use std::sync::Arc;

use indoc::indoc;
use itertools::Itertools;
use log::info;
use serde::Serialize;

use super::{
    Document,
    retriever::{Retrieve, ScoredDocument, SearchOptions},
};
use crate::{
    error::{ChainError, ChainResult},
    log_block,
    model::{ChatMessage, ChatModel, Role},
    template::{ChatTemplate, PromptTemplate, request},
};

const QA_SYSTEM: &str = indoc! {"
    你是專業的文檔助手，專門回答使用手冊相關問題。

    請根據以下參考資料回答問題：
    {context}

    回答要求：
    1. 基於提供的參考資料回答
    2. 回答要清楚、具體、易懂
    3. 如果參考資料中沒有相關資訊，請明確告知
    4. 使用繁體中文回答
    5. 可以適當引用參考資料中的內容

"};

const COMPARE_SYSTEM: &str = indoc! {"
    你是專業的產品分析師，擅長比較分析不同產品或服務。

    你將收到多個產品/服務的相關資料，請進行詳細的比較分析。

    {documents}

    請根據使用者的問題進行比較分析：
    1. 列出相似點
    2. 列出差異點
    3. 分析各自的優缺點
    4. 提供選擇建議

    回答要求：
    - 使用繁體中文
    - 條理清晰，使用列表或表格方式呈現
    - 基於提供的資料進行分析
    - 如果某個產品缺少相關資訊，請明確說明
"};

const CONTEXTUALIZE_SYSTEM: &str = indoc! {"
    給定聊天歷史和最新的使用者問題，該問題可能引用聊天歷史中的上下文，
    請制定一個獨立的問題，可以在沒有聊天歷史的情況下理解。
    不要回答問題，只需在需要時重新表述，否則按原樣返回。
"};

const CONVERSATION_SYSTEM: &str = indoc! {"
    你是一個問答任務的助手。使用以下檢索到的上下文片段來回答問題。
    如果你不知道答案，就說你不知道。最多使用三個句子並保持答案簡潔。
    {context}
"};

const PREVIEW_CHARS: usize = 150;
const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Numbered context block handed to the model.
pub fn format_docs(docs: &[Document]) -> String {
    if docs.is_empty() {
        return "無相關資料".to_string();
    }

    let blocks = docs
        .iter()
        .enumerate()
        .map(|(i, doc)| {
            format!(
                "【參考資料 {} - {}】\n{}",
                i + 1,
                doc.source_name(),
                doc.content.trim()
            )
        })
        .join("\n\n");

    format!("\n\n{blocks}")
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SourcePreview {
    pub name: String,
    pub preview: String,
    pub score: f32,
}

impl SourcePreview {
    fn of(scored: &ScoredDocument) -> Self {
        let content = scored.document.content.trim();
        let preview = content.chars().take(PREVIEW_CHARS).collect::<String>() + "...";
        Self {
            name: scored.document.source_name().to_string(),
            preview,
            score: scored.score,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Answer {
    pub question: String,
    pub text: String,
    pub sources: Vec<SourcePreview>,
    /// Human readable name of the retrieval strategy
    pub strategy: String,
    /// Document the search was restricted to, if any
    pub scope: Option<String>,
}

impl Answer {
    pub fn render(&self) -> String {
        let mut out = format!(
            "📋 您的問題\n{RULE}\n{}\n\n💡 AI 回答\n{RULE}\n{}\n\n📚 參考資料來源\n{RULE}\n",
            self.question,
            self.text.trim()
        );

        for (i, source) in self.sources.iter().enumerate() {
            out.push_str(&format!("\n{}. 【{}】\n   {}\n", i + 1, source.name, source.preview));
        }

        out.push_str(&format!(
            "\n{RULE}\n🔍 檢索設定\n{RULE}\n• 搜尋範圍：{}\n• 檢索策略：{}\n• 結果數量：{} 個文檔區塊",
            self.scope.as_deref().unwrap_or("全部文檔"),
            self.strategy,
            self.sources.len(),
        ));

        out
    }
}

/// Retrieval augmented question answering over any [`Retrieve`] implementation.
#[derive(Clone)]
pub struct RagQa {
    pub retriever: Arc<dyn Retrieve>,
    pub model: Arc<dyn ChatModel>,
    pub options: SearchOptions,
    qa: ChatTemplate,
    compare: ChatTemplate,
    conversation: PromptTemplate,
}

/// Prior user and assistant turns, skipping anything else a caller left in the history.
fn prior_turns(history: &[ChatMessage]) -> impl Iterator<Item = ChatMessage> + '_ {
    history
        .iter()
        .filter(|m| matches!(m.role, Role::User | Role::Assistant))
        .cloned()
}

impl RagQa {
    pub fn new(
        retriever: Arc<dyn Retrieve>,
        model: Arc<dyn ChatModel>,
        options: SearchOptions,
    ) -> ChainResult<Self> {
        Ok(Self {
            retriever,
            model,
            options,
            qa: ChatTemplate::system_human(QA_SYSTEM, "問題：{question}")?,
            compare: ChatTemplate::system_human(COMPARE_SYSTEM, "比較問題：{question}")?,
            conversation: PromptTemplate::new(CONVERSATION_SYSTEM)?,
        })
    }

    /// Answers from the indexed documents, optionally only those named `source_name`.
    pub async fn ask(&self, question: &str, source_name: Option<&str>) -> ChainResult<Answer> {
        if question.trim().is_empty() {
            return Err(ChainError::Parse("請輸入您的問題".into()));
        }

        let options = self
            .options
            .clone()
            .with_source(source_name.map(str::to_string));
        let hits = self.retriever.retrieve(question, &options).await?;
        if hits.is_empty() {
            return Err(ChainError::not_found("documents", question));
        }
        info!("Retrieved {} chunks for question", hits.len());

        let docs = hits.iter().map(|h| h.document.clone()).collect_vec();
        let context = format_docs(&docs);
        log_block("Context:", &context);

        let messages = self
            .qa
            .format_messages(&request([("context", context.as_str()), ("question", question)]))?;
        let text = self.model.invoke(&messages).await?.into_text();

        Ok(Answer {
            question: question.to_string(),
            text,
            sources: hits.iter().map(SourcePreview::of).collect(),
            strategy: options.kind.label().to_string(),
            scope: source_name.map(str::to_string),
        })
    }

    /// Answers a follow up question in the light of `history`.
    ///
    /// With prior turns the model first restates the question so it stands on its own, and that
    /// restatement is what gets searched. The question and answer are appended to `history` only
    /// when the whole exchange succeeds.
    pub async fn ask_in_conversation(
        &self,
        question: &str,
        history: &mut Vec<ChatMessage>,
    ) -> ChainResult<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ChainError::Parse("請輸入您的問題".into()));
        }

        let search = self.standalone_question(question, history).await?;
        let hits = self.retriever.retrieve(&search, &self.options).await?;
        if hits.is_empty() {
            return Err(ChainError::not_found("documents", search));
        }
        info!("Retrieved {} chunks for follow up question", hits.len());

        let docs = hits.iter().map(|h| h.document.clone()).collect_vec();
        let context = format_docs(&docs);
        log_block("Context:", &context);

        let system = self.conversation.format(&request([("context", context.as_str())]))?;
        let messages = std::iter::once(ChatMessage::system(system))
            .chain(prior_turns(history))
            .chain(std::iter::once(ChatMessage::user(question)))
            .collect_vec();
        let text = self.model.invoke(&messages).await?.into_text();

        history.push(ChatMessage::user(question));
        history.push(ChatMessage::assistant(&text));

        Ok(Answer {
            question: question.to_string(),
            text,
            sources: hits.iter().map(SourcePreview::of).collect(),
            strategy: self.options.kind.label().to_string(),
            scope: None,
        })
    }

    /// Restates `question` without references to earlier turns. Without history it is searched as is.
    async fn standalone_question(&self, question: &str, history: &[ChatMessage]) -> ChainResult<String> {
        if prior_turns(history).next().is_none() {
            return Ok(question.to_string());
        }

        let messages = std::iter::once(ChatMessage::system(CONTEXTUALIZE_SYSTEM))
            .chain(prior_turns(history))
            .chain(std::iter::once(ChatMessage::user(question)))
            .collect_vec();
        let rewritten = self.model.invoke(&messages).await?.into_text();
        let rewritten = rewritten.trim();

        if rewritten.is_empty() {
            return Ok(question.to_string());
        }
        log_block("Standalone question:", rewritten);
        Ok(rewritten.to_string())
    }

    /// Compares two or more named documents against the same question.
    ///
    /// Each document is searched separately so every one of them contributes context.
    pub async fn compare(&self, question: &str, names: &[&str]) -> ChainResult<String> {
        if question.trim().is_empty() {
            return Err(ChainError::Parse("請輸入比較問題".into()));
        }
        if names.len() < 2 {
            return Err(ChainError::Parse("請至少選擇兩個文檔進行比較".into()));
        }

        let mut sections = vec![];
        for name in names {
            let options = self.options.clone().with_source(Some(name.to_string()));
            let hits = self.retriever.retrieve(question, &options).await?;
            let context = if hits.is_empty() {
                "無相關資料".to_string()
            } else {
                hits.iter().map(|h| h.document.content.trim()).join("\n\n")
            };
            sections.push(format!("{name} 的相關資料：\n{context}"));
        }

        let documents = sections.join("\n\n");
        let messages = self
            .compare
            .format_messages(&request([("documents", documents.as_str()), ("question", question)]))?;
        Ok(self.model.invoke(&messages).await?.into_text())
    }
}
