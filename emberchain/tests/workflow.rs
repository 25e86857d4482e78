use chrono::NaiveDate;
use googletest::prelude::*;

use emberchain::{
    ChainError,
    workflow::{ResearchWorkflow, Stage},
};

mod utils;
use utils::*;

#[tokio::test]
async fn it_runs_stages_in_order() -> anyhow::Result<()> {
    let log = PromptLog::default();
    let workflow = ResearchWorkflow {
        researcher: Box::new(FakeAgent::new("research", &log)),
        analyst: Box::new(FakeAgent::new("analysis", &log)),
        writer: Box::new(FakeAgent::new("writing", &log)),
    };

    let report = workflow.run("LangChain").await?;

    let prompts = log.lock().unwrap().clone();
    assert_that!(prompts.len(), eq(3));
    assert_that!(prompts[0], eq("research: 搜尋關於「LangChain」的詳細資訊"));
    assert_that!(prompts[1], starts_with("analysis: 分析以下資料並提取關鍵要點：\n<research>"));
    assert_that!(prompts[2], contains_substring("主題：LangChain"));
    assert_that!(prompts[2], contains_substring("分析結果：\n<analysis>"));

    assert_that!(report.research, eq("<research>搜尋關於「LangChain」的詳細資訊</research>"));
    assert_that!(report.final_report, eq("<writing>將以下內容格式化成專業報告：</writing>"));

    let at = NaiveDate::from_ymd_opt(2025, 1, 2)
        .and_then(|d| d.and_hms_opt(3, 4, 5))
        .ok_or_else(|| anyhow::anyhow!("bad time"))?;
    let rendered = report.render(at);
    assert_that!(rendered, contains_substring("研究報告：LangChain"));
    assert_that!(rendered, contains_substring("報告生成時間：2025-01-02 03:04:05"));
    Ok(())
}

#[tokio::test]
async fn it_names_the_failing_stage() -> anyhow::Result<()> {
    let log = PromptLog::default();
    let workflow = ResearchWorkflow {
        researcher: Box::new(FakeAgent::new("research", &log)),
        analyst: Box::new(FakeAgent::broken("analysis", &log)),
        writer: Box::new(FakeAgent::new("writing", &log)),
    };

    let err = match workflow.run("機器學習").await {
        Ok(_) => anyhow::bail!("analysis stage should have failed"),
        Err(err) => err,
    };

    assert_that!(err.stage(), eq(Stage::Analysis));
    assert_that!(err.to_string(), eq("分析階段失敗"));
    assert_that!(
        std::error::Error::source(&err)
            .and_then(|s| s.downcast_ref::<ChainError>())
            .is_some(),
        eq(true)
    );
    // The writer never ran
    assert_that!(log.lock().unwrap().len(), eq(2));
    Ok(())
}
