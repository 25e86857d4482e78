use indoc::{formatdoc, indoc};

use super::TextTool;
use crate::error::ChainResult;

const TOPICS: [(&str, &str); 3] = [
    (
        "AI Agent",
        indoc! {"
            AI Agent 是一種能夠自主決策和執行任務的智能系統。
            主要特點包括：
            1. 自主決策能力
            2. 工具整合能力
            3. 任務規劃能力
            4. 動態適應能力

            最新發展趨勢：
            - 多 Agent 協作系統
            - 更強大的推理能力
            - 更好的工具使用能力
        "},
    ),
    (
        "LangChain",
        indoc! {"
            LangChain 是一個用於開發 LLM 應用的框架。
            核心組件包括：
            1. Chains：連接多個組件
            2. Agents：自主決策系統
            3. Tools：外部工具整合
            4. Memory：對話記憶管理

            主要優勢：
            - 模組化設計
            - 豐富的整合選項
            - 活躍的社群支援
        "},
    ),
    (
        "機器學習",
        indoc! {"
            機器學習是人工智慧的一個分支。
            主要類型：
            1. 監督式學習
            2. 非監督式學習
            3. 強化學習

            應用領域：
            - 圖像識別
            - 自然語言處理
            - 推薦系統
            - 預測分析
        "},
    ),
];

/// Canned search results for the research stage.
pub struct SearchInformation;

impl TextTool for SearchInformation {
    const NAME: &'static str = "search_information";
    const DESCRIPTION: &'static str = "搜尋相關資訊。輸入應該是搜尋查詢字串。";

    fn invoke(&self, input: &str) -> ChainResult<String> {
        let query = input.trim();
        let needle = query.to_lowercase();

        let hit = TOPICS.iter().find(|(key, _)| {
            let key = key.to_lowercase();
            needle.contains(&key) || (!needle.is_empty() && key.contains(&needle))
        });

        Ok(match hit {
            Some((_, body)) => format!("搜尋「{query}」的結果：\n{body}"),
            None => format!("搜尋「{query}」的結果：\n找到一些相關資訊，但需要更具體的查詢。"),
        })
    }
}

pub struct AnalyzeData;

impl TextTool for AnalyzeData {
    const NAME: &'static str = "analyze_data";
    const DESCRIPTION: &'static str = "分析資料並提取關鍵資訊。輸入應該是要分析的資料。";

    fn invoke(&self, input: &str) -> ChainResult<String> {
        let words = input.split_whitespace().count();
        let lines = input.split('\n').count();

        Ok(formatdoc!(
            "
                資料分析結果：
                - 總字數：約 {} 字
                - 行數：{} 行
                - 資料類型：文本資料
                - 結構：包含標題和內容段落

                關鍵要點：
                1. 資料結構清晰
                2. 包含多個主題
                3. 適合進一步整理和撰寫

                建議：
                - 可以提取關鍵資訊
                - 建議組織成結構化報告
                - 需要添加摘要和結論",
            words,
            lines
        ))
    }
}

pub struct FormatReport;

impl TextTool for FormatReport {
    const NAME: &'static str = "format_report";
    const DESCRIPTION: &'static str = "格式化報告內容。輸入應該是報告的主要內容。";

    fn invoke(&self, input: &str) -> ChainResult<String> {
        let rule = "=".repeat(60);
        Ok(format!(
            "{rule}\n研究報告\n{rule}\n\n{}\n\n{rule}\n報告結束\n{rule}",
            input.trim()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;

    #[test]
    fn search_matches_topics_case_insensitively() -> anyhow::Result<()> {
        let reply = SearchInformation.invoke("ai agent 的最新發展")?;
        assert_that!(reply, contains_substring("多 Agent 協作系統"));

        let reply = SearchInformation.invoke("量子計算")?;
        assert_that!(reply, ends_with("找到一些相關資訊，但需要更具體的查詢。"));
        Ok(())
    }

    #[test]
    fn analysis_counts_words_and_lines() -> anyhow::Result<()> {
        let reply = AnalyzeData.invoke("one two\nthree")?;
        assert_that!(reply, contains_substring("總字數：約 3 字"));
        assert_that!(reply, contains_substring("行數：2 行"));
        Ok(())
    }

    #[test]
    fn report_is_framed() -> anyhow::Result<()> {
        let reply = FormatReport.invoke("  內容  ")?;
        assert_that!(reply, starts_with(format!("{}\n研究報告", "=".repeat(60))));
        assert_that!(reply, contains_substring("\n\n內容\n\n"));
        Ok(())
    }
}
