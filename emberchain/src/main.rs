use std::sync::Arc;

use anyhow::{Result, bail};
use chrono::Local;
use log::{info, warn};
use tokio::io::{AsyncBufReadExt as _, AsyncReadExt as _, BufReader};
use tracing_log::LogTracer;
use tracing_subscriber::EnvFilter;

use emberchain::{
    ChainError, ChatModel, Config, Task,
    agent::{shop_agent, utility_agent},
    chain::{content_analysis, customer_service, validate_content, validate_question},
    history::ChatSession,
    model::build_model,
    rag::{IndexStatus, RagQa, SearchOptions, prepare_index},
    report::{ContentStats, format_analysis_report, format_customer_reply, format_statistics},
    template::{TemplateLibrary, request},
    tools::DemoDatabase,
    workflow::ResearchWorkflow,
};

const CHAT_SYSTEM: &str = "你是一個友善且樂於助人的 AI 助手，請使用繁體中文回答。";

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load()?;

    if config.dump_config.unwrap_or_default() {
        let config = Config {
            dump_config: None,
            ..config
        };
        println!("{}", toml::to_string(&config)?);
        return Ok(());
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    LogTracer::init()?;

    let Some(task) = config.task else {
        bail!("No task given. Run with --help to list the available tasks");
    };

    match run(task, &config).await {
        Ok(output) => {
            println!("{output}");
            Ok(())
        }
        Err(err) => match err.downcast_ref::<ChainError>() {
            Some(chain_err) => {
                eprintln!("{}", chain_err.display_marker());
                std::process::exit(1);
            }
            None => Err(err),
        },
    }
}

async fn read_input(config: &Config) -> Result<String> {
    if let Some(input) = &config.input {
        return Ok(input.clone());
    }
    let mut buf = String::new();
    tokio::io::stdin().read_to_string(&mut buf).await?;
    Ok(buf)
}

async fn run(task: Task, config: &Config) -> Result<String> {
    let now = || Local::now().naive_local();

    match task {
        Task::Route => {
            let question = read_input(config).await?;
            validate_question(&question)?;
            let model = build_model(config)?;
            let (branch, reply) = customer_service()?
                .invoke(model.as_ref(), &request([("question", question.trim())]))
                .await?;
            info!("Answered on the {branch} branch");
            Ok(format_customer_reply(&reply, now()))
        }
        Task::Analyze => {
            let content = read_input(config).await?;
            validate_content(&content)?;
            let model = build_model(config)?;
            let results = content_analysis()?
                .analyze(model.as_ref(), &request([("content", content.as_str())]))
                .await;
            let at = now();
            Ok(format_analysis_report(&results, at) + &format_statistics(&ContentStats::of(&content), at))
        }
        Task::Template => {
            let raw = read_input(config).await?;
            let (name, body) = raw.split_once('\n').unwrap_or((raw.as_str(), ""));
            let library = TemplateLibrary::builtin()?;
            let name = name.trim();
            let input = library.prepare_input(name, body.trim())?;
            let model = build_model(config)?;
            let run = library.run(model.as_ref(), name, &input).await?;
            Ok(format!("{}\n\n{}", run.formatted_prompt, run.response.trim()))
        }
        Task::Chat => chat(config).await,
        Task::Index => {
            let (index, status) = prepare_index(config).await?;
            Ok(match status {
                IndexStatus::Reused => format!("✅ 使用既有的向量索引 {}", index.collection()),
                IndexStatus::Built { documents, chunks } => format!(
                    "✅ 已建立向量索引 {}：{documents} 個文檔，{chunks} 個區塊",
                    index.collection()
                ),
            })
        }
        Task::Ask => {
            let question = read_input(config).await?;
            let (index, _) = prepare_index(config).await?;
            let qa = RagQa::new(index, build_model(config)?, SearchOptions::from_config(config))?;
            Ok(qa.ask(question.trim(), None).await?.render())
        }
        Task::Converse => converse(config).await,
        Task::Agent => {
            let input = read_input(config).await?;
            Ok(shop_agent(config)?.run(input.trim(), &mut vec![]).await?)
        }
        Task::Tools => {
            let input = read_input(config).await?;
            Ok(utility_agent(config)?.run(input.trim(), &mut vec![]).await?)
        }
        Task::Research => {
            let topic = read_input(config).await?;
            let topic = topic.trim();
            if topic.is_empty() {
                return Err(ChainError::Parse("請輸入研究主題".into()).into());
            }
            let report = ResearchWorkflow::from_config(config)?.run(topic).await?;
            Ok(report.render(now()))
        }
        Task::Sql => {
            let sql = read_input(config).await?;
            let database = DemoDatabase::new(config.required("database", &config.database)?.clone());
            database.seed()?;
            Ok(database.query(&sql)?)
        }
    }
}

/// Line oriented conversation on stdin. `/clear` forgets the turns, `/exit` ends the session.
async fn chat(config: &Config) -> Result<String> {
    let model: Arc<dyn ChatModel> = build_model(config)?;
    let mut session = ChatSession::with_system(CHAT_SYSTEM);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/exit" => break,
            "/clear" => {
                session.clear();
                println!("🗑️ 對話已清除");
            }
            input => match session.ask(model.as_ref(), input).await {
                Ok(reply) => println!("{}\n", reply.trim()),
                Err(err) => {
                    warn!("Chat turn failed: {err}");
                    println!("{}\n", err.display_marker());
                }
            },
        }
    }

    Ok(format!("對話結束，共 {} 則訊息", session.len()))
}

/// Questions over the indexed documents that may refer back to earlier answers. `/clear` starts over.
async fn converse(config: &Config) -> Result<String> {
    let (index, _) = prepare_index(config).await?;
    let qa = RagQa::new(index, build_model(config)?, SearchOptions::from_config(config))?;
    let mut history = vec![];
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "" => continue,
            "/exit" => break,
            "/clear" => {
                history.clear();
                println!("🗑️ 對話已清除");
            }
            question => match qa.ask_in_conversation(question, &mut history).await {
                Ok(answer) => println!("{}\n", answer.text.trim()),
                Err(err) => {
                    warn!("Follow up question failed: {err}");
                    println!("{}\n", err.display_marker());
                }
            },
        }
    }

    Ok(format!("對話結束，共 {} 則訊息", history.len()))
}
