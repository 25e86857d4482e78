use std::sync::Arc;

use googletest::prelude::*;

use emberchain::{
    ChainError, ChatMessage, Role,
    rag::{RagQa, SearchOptions},
};

mod utils;
use utils::*;

const MANUALS: [(&str, &str, f32); 4] = [
    ("手機使用手冊", "長按電源鍵三秒即可開機。", 0.91),
    ("退貨政策", "商品到貨七天內可申請退貨。", 0.84),
    ("手機使用手冊", "設定中可開啟省電模式。", 0.72),
    ("筆電使用手冊", "筆電電池建議保持在百分之二十以上。", 0.65),
];

fn qa(model: Arc<EchoModel>, retriever: Arc<FixedRetriever>) -> anyhow::Result<RagQa> {
    Ok(RagQa::new(retriever, model, SearchOptions::similarity(3))?)
}

#[tokio::test]
async fn it_answers_with_numbered_context() -> anyhow::Result<()> {
    let model = Arc::new(EchoModel::default());
    let qa = qa(model.clone(), Arc::new(FixedRetriever::new(&MANUALS)))?;

    let answer = qa.ask("怎麼開機？", None).await?;

    let sent = model.last_call();
    assert_that!(sent[0].content, contains_substring("【參考資料 1 - 手機使用手冊】\n長按電源鍵三秒即可開機。"));
    assert_that!(sent[0].content, contains_substring("【參考資料 3 - 手機使用手冊】"));
    assert_that!(sent[1].content, eq("問題：怎麼開機？"));

    assert_that!(answer.sources.len(), eq(3));
    assert_that!(answer.sources[1].name, eq("退貨政策"));
    assert_that!(answer.scope, none());

    let rendered = answer.render();
    assert_that!(rendered, contains_substring("• 搜尋範圍：全部文檔"));
    assert_that!(rendered, contains_substring("• 檢索策略：相似度搜尋"));
    assert_that!(rendered, contains_substring("• 結果數量：3 個文檔區塊"));
    Ok(())
}

#[tokio::test]
async fn it_restricts_search_to_one_document() -> anyhow::Result<()> {
    let model = Arc::new(EchoModel::default());
    let retriever = Arc::new(FixedRetriever::new(&MANUALS));
    let qa = qa(model, retriever.clone())?;

    let answer = qa.ask("電池怎麼保養？", Some("筆電使用手冊")).await?;

    assert_that!(answer.sources.len(), eq(1));
    assert_that!(answer.sources[0].name, eq("筆電使用手冊"));
    assert_that!(answer.scope, some(eq("筆電使用手冊")));
    assert_that!(
        retriever.seen.lock().unwrap()[0].source_name,
        some(eq("筆電使用手冊"))
    );
    Ok(())
}

#[tokio::test]
async fn it_reports_missing_documents() -> anyhow::Result<()> {
    let model = Arc::new(EchoModel::default());
    let qa = qa(model.clone(), Arc::new(FixedRetriever::default()))?;

    let result = qa.ask("有保固嗎？", None).await;

    assert_that!(
        result,
        err(matches_pattern!(ChainError::ResourceNotFound {
            kind: eq(&"documents"),
            ..
        }))
    );
    assert_that!(model.call_count(), eq(0));
    Ok(())
}

#[tokio::test]
async fn it_rejects_an_empty_question() -> anyhow::Result<()> {
    let model = Arc::new(EchoModel::default());
    let qa = qa(model, Arc::new(FixedRetriever::new(&MANUALS)))?;

    assert_that!(
        qa.ask("   ", None).await,
        err(matches_pattern!(ChainError::Parse(eq("請輸入您的問題"))))
    );
    Ok(())
}

#[tokio::test]
async fn it_compares_documents_one_search_each() -> anyhow::Result<()> {
    let model = Arc::new(EchoModel::default());
    let retriever = Arc::new(FixedRetriever::new(&MANUALS));
    let qa = qa(model.clone(), retriever.clone())?;

    qa.compare("電力管理有什麼不同？", &["手機使用手冊", "筆電使用手冊"]).await?;

    assert_that!(retriever.seen.lock().unwrap().len(), eq(2));
    let sent = model.last_call();
    assert_that!(sent[0].content, contains_substring("手機使用手冊 的相關資料：\n長按電源鍵三秒即可開機。"));
    assert_that!(sent[0].content, contains_substring("筆電使用手冊 的相關資料：\n筆電電池"));
    assert_that!(sent[1].content, eq("比較問題：電力管理有什麼不同？"));

    assert_that!(
        qa.compare("哪個好？", &["手機使用手冊"]).await,
        err(matches_pattern!(ChainError::Parse(anything())))
    );
    Ok(())
}

fn earlier_turns() -> Vec<ChatMessage> {
    vec![
        ChatMessage::user("手機使用手冊有哪些內容？"),
        ChatMessage::assistant("包含開機與省電設定。"),
    ]
}

#[tokio::test]
async fn it_searches_with_the_restated_follow_up() -> anyhow::Result<()> {
    let model = Arc::new(EchoModel::default());
    let retriever = Arc::new(FixedRetriever::new(&MANUALS));
    let qa = qa(model.clone(), retriever.clone())?;
    let mut history = earlier_turns();

    let answer = qa.ask_in_conversation("它怎麼開機？", &mut history).await?;

    let queries = retriever.queries.lock().unwrap().clone();
    assert_that!(queries.len(), eq(1));
    assert_that!(queries[0], starts_with("[給定聊天歷史和最新的使用者問題"));
    assert_that!(queries[0], ends_with("] 它怎麼開機？"));

    assert_that!(model.call_count(), eq(2));
    let sent = model.last_call();
    assert_that!(sent.len(), eq(4));
    assert_that!(sent[0].content, contains_substring("【參考資料 1 - 手機使用手冊】"));
    assert_that!(sent[1], eq(&ChatMessage::user("手機使用手冊有哪些內容？")));
    assert_that!(sent[3], eq(&ChatMessage::user("它怎麼開機？")));

    assert_that!(history.len(), eq(4));
    assert_that!(history[2], eq(&ChatMessage::user("它怎麼開機？")));
    assert_that!(history[3].role, eq(Role::Assistant));
    assert_that!(history[3].content, eq(&answer.text));
    Ok(())
}

#[tokio::test]
async fn it_searches_the_first_question_as_is() -> anyhow::Result<()> {
    let model = Arc::new(EchoModel::default());
    let retriever = Arc::new(FixedRetriever::new(&MANUALS));
    let qa = qa(model.clone(), retriever.clone())?;
    let mut history = vec![];

    qa.ask_in_conversation("怎麼開啟省電模式？", &mut history).await?;

    assert_that!(retriever.queries.lock().unwrap().clone(), elements_are![eq("怎麼開啟省電模式？")]);
    assert_that!(model.call_count(), eq(1));
    assert_that!(history.len(), eq(2));
    Ok(())
}

#[tokio::test]
async fn it_keeps_history_when_the_answer_fails() -> anyhow::Result<()> {
    let model = Arc::new(EchoModel::failing_on("你是一個問答任務的助手"));
    let qa = qa(model, Arc::new(FixedRetriever::new(&MANUALS)))?;
    let mut history = earlier_turns();

    let result = qa.ask_in_conversation("它怎麼開機？", &mut history).await;

    assert_that!(result, err(matches_pattern!(ChainError::ModelUnavailable(anything()))));
    assert_that!(history, eq(&earlier_turns()));
    Ok(())
}
