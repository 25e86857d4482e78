use chrono::NaiveDate;
use googletest::prelude::*;

use emberchain::{
    ChainError,
    chain::{DIMENSIONS, content_analysis, customer_service},
    report::format_analysis_report,
    template::request,
};

mod utils;
use utils::*;

#[tokio::test]
async fn it_routes_complaints() -> anyhow::Result<()> {
    let model = EchoModel::default();
    let selector = customer_service()?;

    let (branch, reply) = selector
        .invoke(&model, &request([("question", "我要投訴，你們的服務太糟糕了")]))
        .await?;

    assert_that!(branch, eq("complaint"));
    assert_that!(reply, starts_with("[你是專業的客服人員，處理客戶投訴。"));
    assert_that!(reply, ends_with("客戶投訴：我要投訴，你們的服務太糟糕了"));
    Ok(())
}

#[tokio::test]
async fn it_routes_refunds_and_weather_questions() -> anyhow::Result<()> {
    let model = EchoModel::default();
    let selector = customer_service()?;

    let (branch, reply) = selector
        .invoke(&model, &request([("question", "我想要退貨")]))
        .await?;
    assert_that!(branch, eq("refund"));
    assert_that!(reply, ends_with("退換貨請求：我想要退貨"));

    let (branch, reply) = selector
        .invoke(&model, &request([("question", "今天天氣如何")]))
        .await?;
    assert_that!(branch, eq("general"));
    assert_that!(reply, ends_with("客戶問題：今天天氣如何"));
    Ok(())
}

#[tokio::test]
async fn it_prefers_the_earlier_rule() -> anyhow::Result<()> {
    let selector = customer_service()?;

    let (branch, _) = selector.select(&request([("question", "價格太高，我想退貨")]));
    assert_that!(branch, eq("refund"));

    let (branch, _) = selector.select(&request([("question", "我要抱怨，還要退款")]));
    assert_that!(branch, eq("complaint"));
    Ok(())
}

#[tokio::test]
async fn it_falls_back_to_general() -> anyhow::Result<()> {
    let model = EchoModel::default();
    let selector = customer_service()?;

    let (branch, reply) = selector
        .invoke(&model, &request([("question", "你們幾點開門？")]))
        .await?;
    assert_that!(branch, eq("general"));
    assert_that!(reply, ends_with("客戶問題：你們幾點開門？"));

    // Triggers are literal substrings, split keywords do not count
    let (branch, _) = selector.select(&request([("question", "我要投 訴")]));
    assert_that!(branch, eq("general"));
    Ok(())
}

#[tokio::test]
async fn it_reports_model_failure_on_the_chosen_branch() -> anyhow::Result<()> {
    let selector = customer_service()?;

    let result = selector
        .invoke(&DownModel, &request([("question", "這個功能怎麼用")]))
        .await;
    assert_that!(result, err(matches_pattern!(ChainError::ModelUnavailable(anything()))));
    Ok(())
}

#[tokio::test]
async fn it_analyzes_every_dimension() -> anyhow::Result<()> {
    let model = EchoModel::default();
    let analyzer = content_analysis()?;
    let content = "這款咖啡機操作簡單，適合上班族在家使用。";

    let results = analyzer.analyze(&model, &request([("content", content)])).await;

    assert_that!(results.keys().map(String::as_str).collect::<Vec<_>>(), unordered_elements_are![
        eq("audience"),
        eq("improvement"),
        eq("keywords"),
        eq("sentiment")
    ]);
    assert_that!(analyzer.keys().collect::<Vec<_>>(), elements_are![
        eq(DIMENSIONS[0]),
        eq(DIMENSIONS[1]),
        eq(DIMENSIONS[2]),
        eq(DIMENSIONS[3])
    ]);
    assert_that!(model.call_count(), eq(4));

    let sentiment = results["sentiment"].as_deref().map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_that!(sentiment, contains_substring(content));
    Ok(())
}

#[tokio::test]
async fn it_isolates_a_failing_dimension() -> anyhow::Result<()> {
    let model = EchoModel::failing_on("受眾");
    let analyzer = content_analysis()?;

    let results = analyzer
        .analyze(&model, &request([("content", "週末市集將在河濱公園舉辦，歡迎全家大小參加。")]))
        .await;

    assert_that!(results.len(), eq(4));
    assert_that!(results["audience"].is_err(), eq(true));
    assert_that!(results["sentiment"].is_ok(), eq(true));
    assert_that!(results["keywords"].is_ok(), eq(true));
    assert_that!(results["improvement"].is_ok(), eq(true));

    let at = NaiveDate::from_ymd_opt(2025, 3, 14)
        .and_then(|d| d.and_hms_opt(9, 30, 0))
        .ok_or_else(|| anyhow::anyhow!("bad date"))?;
    let report = format_analysis_report(&results, at);
    assert_that!(report, contains_substring("內容分析報告 - 2025-03-14 09:30"));
    assert_that!(report, contains_substring("⚠️ 此項分析失敗"));
    assert_that!(report, contains_substring("✅ 完成 3 項分析，失敗 1 項"));
    Ok(())
}

#[tokio::test]
async fn it_rejects_missing_fields_before_calling_the_model() -> anyhow::Result<()> {
    let model = EchoModel::default();
    let selector = customer_service()?;

    let result = selector.invoke(&model, &request([("content", "你好")])).await;

    assert_that!(
        result,
        err(matches_pattern!(ChainError::TemplateFieldMissing(elements_are![eq("question")])))
    );
    assert_that!(model.call_count(), eq(0));
    Ok(())
}
