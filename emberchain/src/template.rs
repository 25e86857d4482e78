use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use indoc::indoc;
use itertools::Itertools;
use minijinja::Environment;
use serde::{Deserialize, Serialize};

use crate::{
    error::{ChainError, ChainResult},
    model::{ChatMessage, ChatModel, Role},
};

/// Named string fields handed to a pipeline.
pub type Request = BTreeMap<String, String>;

pub fn request<K: Into<String>, V: Into<String>>(fields: impl IntoIterator<Item = (K, V)>) -> Request {
    fields
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// A prompt with `{name}` placeholders. Doubled braces are literal.
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    source: String,
    variables: Vec<String>,
    env: Environment<'static>,
}

enum Segment {
    Literal(String),
    Field(String),
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn scan(source: &str) -> ChainResult<Vec<Segment>> {
    let mut segments = vec![];
    let mut literal = String::new();
    let mut chars = source.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                literal.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                literal.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                let name = name.trim();
                if !closed || !is_identifier(name) {
                    return Err(ChainError::Parse(format!(
                        "Invalid placeholder {{{name}}} in template"
                    )));
                }
                if !literal.is_empty() {
                    segments.push(Segment::Literal(std::mem::take(&mut literal)));
                }
                segments.push(Segment::Field(name.to_string()));
            }
            '}' => return Err(ChainError::Parse("Unmatched '}' in template".into())),
            _ => literal.push(ch),
        }
    }

    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }

    Ok(segments)
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> ChainResult<Self> {
        let source = source.into();
        let segments = scan(&source)?;

        let mut jinja = String::new();
        let mut variables = vec![];
        for segment in segments {
            match segment {
                Segment::Literal(text) if text.contains(['{', '}']) => {
                    jinja.push_str("{% raw %}");
                    jinja.push_str(&text);
                    jinja.push_str("{% endraw %}");
                }
                Segment::Literal(text) => jinja.push_str(&text),
                Segment::Field(name) => {
                    // Subscripted so names like `none` or `true` still look up the request
                    jinja.push_str(&format!("{{{{ fields[\"{name}\"] }}}}"));
                    if !variables.contains(&name) {
                        variables.push(name);
                    }
                }
            }
        }

        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        env.add_template_owned("prompt", jinja)
            .map_err(|e| ChainError::Parse(format!("Invalid template: {e}")))?;

        Ok(Self {
            source,
            variables,
            env,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn input_variables(&self) -> &[String] {
        &self.variables
    }

    pub fn missing_fields(&self, request: &Request) -> Vec<String> {
        self.variables
            .iter()
            .filter(|v| !request.contains_key(*v))
            .cloned()
            .collect()
    }

    pub fn format(&self, request: &Request) -> ChainResult<String> {
        let missing = self.missing_fields(request);
        if !missing.is_empty() {
            return Err(ChainError::TemplateFieldMissing(missing));
        }

        self.env
            .get_template("prompt")
            .and_then(|tmpl| tmpl.render(minijinja::context! { fields => request }))
            .map_err(|e| ChainError::Parse(format!("Could not render template: {e}")))
    }
}

/// Role tagged prompt templates rendered into a conversation.
#[derive(Clone, Debug)]
pub struct ChatTemplate {
    messages: Vec<(Role, PromptTemplate)>,
}

impl ChatTemplate {
    pub fn from_messages<S: Into<String>>(
        messages: impl IntoIterator<Item = (Role, S)>,
    ) -> ChainResult<Self> {
        let messages = messages
            .into_iter()
            .map(|(role, text)| Ok((role, PromptTemplate::new(text)?)))
            .collect::<ChainResult<Vec<_>>>()?;
        Ok(Self { messages })
    }

    /// System instructions followed by a single human turn.
    pub fn system_human(system: &str, human: &str) -> ChainResult<Self> {
        Self::from_messages([(Role::System, system), (Role::User, human)])
    }

    pub fn input_variables(&self) -> Vec<&str> {
        self.messages
            .iter()
            .flat_map(|(_, t)| t.input_variables())
            .map(String::as_str)
            .unique()
            .collect()
    }

    pub fn format_messages(&self, request: &Request) -> ChainResult<Vec<ChatMessage>> {
        let missing = self
            .messages
            .iter()
            .flat_map(|(_, t)| t.missing_fields(request))
            .unique()
            .collect_vec();
        if !missing.is_empty() {
            return Err(ChainError::TemplateFieldMissing(missing));
        }

        self.messages
            .iter()
            .map(|(role, tmpl)| Ok(ChatMessage::new(*role, tmpl.format(request)?)))
            .collect()
    }
}

/// Parses `key=value` lines. Values may contain further `=` signs.
pub fn parse_variables(text: &str) -> ChainResult<Request> {
    let mut fields = Request::new();
    for (lineno, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(ChainError::Parse(format!(
                "輸入資料解析錯誤：第 {} 行缺少 '='",
                lineno + 1
            )));
        };

        let key = key.trim();
        if key.is_empty() {
            return Err(ChainError::Parse(format!(
                "輸入資料解析錯誤：第 {} 行缺少變數名稱",
                lineno + 1
            )));
        }

        fields.insert(key.to_string(), value.trim().to_string());
    }
    Ok(fields)
}

#[derive(Clone, Debug)]
pub struct LibraryTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub example: &'static str,
    pub prompt: PromptTemplate,
}

/// Ready made prompts selectable by name.
#[derive(Clone, Debug)]
pub struct TemplateLibrary {
    templates: Vec<LibraryTemplate>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateRun {
    pub formatted_prompt: String,
    pub response: String,
}

impl TemplateLibrary {
    pub fn builtin() -> ChainResult<Self> {
        let entries = [
            (
                "專業翻譯",
                "將英文翻譯成繁體中文",
                "Hello, how are you today?",
                indoc! {"
                    你是一位專業的繁體中文翻譯家，具有豐富的語言學背景。
                    請將使用者提供的以下英文句子翻譯成流暢、自然的繁體中文。

                    英文句子：{english_sentence}
                    繁體中文翻譯：
                "},
            ),
            (
                "文章摘要",
                "將長篇文章摘要成重點",
                "人工智慧正在改變我們的生活方式...",
                indoc! {"
                    你是一位專業的內容分析師，擅長提取文章的核心要點。
                    請將以下文章摘要成 3-5 個重點，使用繁體中文。

                    文章內容：
                    {article_content}

                    重點摘要：
                "},
            ),
            (
                "程式碼解釋",
                "解釋程式碼的功能和邏輯",
                "def fibonacci(n):\n    if n <= 1:\n        return n\n    return fibonacci(n-1) + fibonacci(n-2)",
                indoc! {"
                    你是一位資深的軟體工程師，擅長程式碼分析和解釋。
                    請詳細解釋以下程式碼的功能、邏輯和用途，使用繁體中文。

                    程式碼：
                    {code_content}

                    程式碼解釋：
                "},
            ),
            (
                "創意寫作",
                "根據主題創作創意內容",
                "未來城市的交通",
                indoc! {"
                    你是一位富有創意的作家，擅長各種文體的創作。
                    請根據以下主題創作一段創意內容，可以是故事、詩歌、散文等，使用繁體中文。

                    主題：{writing_topic}

                    創意內容：
                "},
            ),
            (
                "問題解答",
                "回答各種問題並提供詳細解釋",
                "什麼是量子計算？",
                indoc! {"
                    你是一位知識淵博的專家，能夠回答各種問題並提供詳細的解釋。
                    請詳細回答以下問題，提供準確、有用的資訊，使用繁體中文。

                    問題：{question}

                    詳細回答：
                "},
            ),
            (
                "多變數模板",
                "包含多個變數的複雜模板",
                "role=翻譯員\nexperience=10\ntask_type=文件翻譯\nrequirements=保持專業術語準確性\ninput_content=Hello World\noutput_format=繁體中文",
                indoc! {"
                    你是一位專業的{role}，具有{experience}年的經驗。
                    請根據以下要求處理{task_type}：

                    要求：{requirements}
                    輸入內容：{input_content}
                    輸出格式：{output_format}

                    處理結果：
                "},
            ),
        ];

        let templates = entries
            .into_iter()
            .map(|(name, description, example, text)| {
                Ok(LibraryTemplate {
                    name,
                    description,
                    example,
                    prompt: PromptTemplate::new(text)?,
                })
            })
            .collect::<ChainResult<_>>()?;

        Ok(Self { templates })
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.templates.iter().map(|t| t.name)
    }

    pub fn get(&self, name: &str) -> ChainResult<&LibraryTemplate> {
        self.templates
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| ChainError::not_found("模板", name))
    }

    /// Single variable templates take the raw text, others take `key=value` lines.
    pub fn prepare_input(&self, name: &str, raw: &str) -> ChainResult<Request> {
        let template = self.get(name)?;
        match template.prompt.input_variables() {
            [only] => Ok(request([(only.clone(), raw.to_string())])),
            _ => parse_variables(raw),
        }
    }

    pub async fn run(
        &self,
        model: &dyn ChatModel,
        name: &str,
        input: &Request,
    ) -> ChainResult<TemplateRun> {
        let formatted_prompt = self.get(name)?.prompt.format(input)?;
        let response = model
            .invoke(&[ChatMessage::user(&formatted_prompt)])
            .await?
            .into_text();

        Ok(TemplateRun {
            formatted_prompt,
            response,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub timestamp: NaiveDateTime,
    pub template: String,
    pub input: Request,
    pub run: TemplateRun,
}

/// Processing log kept by the caller, newest last.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TemplateHistory {
    pub records: Vec<TemplateRecord>,
    pub capacity: Option<usize>,
}

impl TemplateHistory {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: vec![],
            capacity: Some(capacity),
        }
    }

    pub fn push(&mut self, record: TemplateRecord) {
        self.records.push(record);
        if let Some(cap) = self.capacity
            && self.records.len() > cap
        {
            let excess = self.records.len() - cap;
            self.records.drain(..excess);
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn export_markdown(&self, at: NaiveDateTime) -> String {
        let mut out = format!(
            "# Prompt Templates 處理歷史\n匯出時間: {}\n\n",
            at.format("%Y-%m-%d %H:%M:%S")
        );
        for (i, record) in self.records.iter().enumerate() {
            out.push_str(&format!("## {}. {}\n", i + 1, record.template));
            out.push_str(&format!(
                "**時間**: {}\n",
                record.timestamp.format("%Y-%m-%d %H:%M:%S")
            ));
            out.push_str(&format!(
                "**輸入**: {}\n\n",
                record.input.iter().map(|(k, v)| format!("{k}={v}")).join(", ")
            ));
            out.push_str(&format!("**回應**:\n{}\n\n---\n\n", record.run.response));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;

    #[test]
    fn placeholders_must_be_identifiers() {
        for source in ["{a-b}", "{1st}", "{ two words }", "{名字}", "{}", "{open"] {
            assert_that!(
                PromptTemplate::new(source),
                err(matches_pattern!(ChainError::Parse(anything())))
            );
        }
    }

    #[test]
    fn keyword_names_are_request_fields() -> anyhow::Result<()> {
        let template = PromptTemplate::new("{none}/{true}/{_x1} {{literal}}")?;
        let text = template.format(&request([("none", "甲"), ("true", "乙"), ("_x1", "丙")]))?;
        assert_that!(text, eq("甲/乙/丙 {literal}"));
        Ok(())
    }
}
