use std::{iter::Peekable, str::Chars};

use chrono::{Local, NaiveDateTime};
use itertools::Itertools;

use super::{TextTool, thousands};
use crate::error::{ChainError, ChainResult};

pub fn format_time(at: NaiveDateTime) -> String {
    at.format("%I:%M %p").to_string()
}

pub struct CurrentTime;

impl TextTool for CurrentTime {
    const NAME: &'static str = "current_time";
    const DESCRIPTION: &'static str = "當你需要知道當前時間時使用";

    fn invoke(&self, _input: &str) -> ChainResult<String> {
        Ok(format_time(Local::now().naive_local()))
    }
}

pub struct Calculator;

impl TextTool for Calculator {
    const NAME: &'static str = "calculator";
    const DESCRIPTION: &'static str =
        "當你需要進行數學計算時使用。輸入應該是數學表達式，例如：'2 + 2' 或 '10 * 5'。";

    fn invoke(&self, input: &str) -> ChainResult<String> {
        let expression = input.trim().trim_matches(['\'', '"']).trim();
        let value = evaluate(expression)?;
        Ok(format!("計算結果：{expression} = {}", format_number(value)))
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Evaluates `+ - * /` with parentheses and unary minus over decimal numbers.
pub fn evaluate(expression: &str) -> ChainResult<f64> {
    const ALLOWED: &str = "0123456789+-*/(). ";
    if expression.chars().any(|c| !ALLOWED.contains(c)) {
        return Err(ChainError::Parse(
            "錯誤：表達式包含不允許的字元。只能使用數字和基本運算符（+, -, *, /, ()）".into(),
        ));
    }

    let invalid = || ChainError::Parse(format!("錯誤：無效的數學表達式「{expression}」"));

    let mut parser = Arithmetic {
        chars: expression.chars().peekable(),
        depth: 0,
    };
    let value = parser.expr().ok_or_else(invalid)??;
    parser.skip_spaces();
    if parser.chars.peek().is_some() {
        return Err(invalid());
    }
    Ok(value)
}

/// Parentheses and unary minus nested deeper than this are refused.
const MAX_NESTING: usize = 64;

struct Arithmetic<'a> {
    chars: Peekable<Chars<'a>>,
    depth: usize,
}

// Each step yields None on a syntax error and Some(Err) on division by zero or excess nesting.
type Step = Option<ChainResult<f64>>;

impl Arithmetic<'_> {
    fn skip_spaces(&mut self) {
        while self.chars.next_if_eq(&' ').is_some() {}
    }

    fn expr(&mut self) -> Step {
        let mut acc = match self.term()? {
            Ok(v) => v,
            err => return Some(err),
        };
        loop {
            self.skip_spaces();
            let Some(op) = self.chars.next_if(|c| *c == '+' || *c == '-') else {
                return Some(Ok(acc));
            };
            let rhs = match self.term()? {
                Ok(v) => v,
                err => return Some(err),
            };
            acc = if op == '+' { acc + rhs } else { acc - rhs };
        }
    }

    fn term(&mut self) -> Step {
        let mut acc = match self.factor()? {
            Ok(v) => v,
            err => return Some(err),
        };
        loop {
            self.skip_spaces();
            let Some(op) = self.chars.next_if(|c| *c == '*' || *c == '/') else {
                return Some(Ok(acc));
            };
            let rhs = match self.factor()? {
                Ok(v) => v,
                err => return Some(err),
            };
            if op == '/' && rhs == 0.0 {
                return Some(Err(ChainError::Parse("錯誤：除數不能為零".into())));
            }
            acc = if op == '*' { acc * rhs } else { acc / rhs };
        }
    }

    fn nested(&mut self, step: impl FnOnce(&mut Self) -> Step) -> Step {
        if self.depth >= MAX_NESTING {
            return Some(Err(ChainError::Parse("錯誤：表達式巢狀過深".into())));
        }
        self.depth += 1;
        let result = step(self);
        self.depth -= 1;
        result
    }

    fn factor(&mut self) -> Step {
        self.skip_spaces();
        match self.chars.peek()? {
            '-' => {
                self.chars.next();
                self.nested(|p| Some(p.factor()?.map(|v| -v)))
            }
            '(' => {
                self.chars.next();
                self.nested(|p| {
                    let inner = p.expr()?;
                    p.skip_spaces();
                    p.chars.next_if_eq(&')')?;
                    Some(inner)
                })
            }
            _ => {
                let mut digits = String::new();
                while let Some(c) = self.chars.next_if(|c| c.is_ascii_digit() || *c == '.') {
                    digits.push(c);
                }
                digits.parse::<f64>().ok().map(Ok)
            }
        }
    }
}

const WEATHER: [(&str, i32, &str, u32, &str); 5] = [
    ("台北", 28, "多雲", 75, "東北風 3 級"),
    ("台中", 30, "晴天", 65, "南風 2 級"),
    ("高雄", 32, "晴天", 70, "西南風 2 級"),
    ("台南", 31, "晴天", 68, "南風 2 級"),
    ("新竹", 27, "陰天", 80, "東北風 4 級"),
];

pub struct GetWeather;

impl TextTool for GetWeather {
    const NAME: &'static str = "get_weather";
    const DESCRIPTION: &'static str = "查詢城市天氣資訊。輸入應該是城市名稱，例如：台北";

    fn invoke(&self, input: &str) -> ChainResult<String> {
        let city = input.trim();
        match WEATHER.iter().find(|w| w.0 == city) {
            Some((city, temp, condition, humidity, wind)) => Ok(format!(
                "{city}天氣資訊：\n- 溫度：{temp}°C\n- 天氣狀況：{condition}\n- 濕度：{humidity}%\n- 風向風力：{wind}"
            )),
            None => {
                let cities = WEATHER.iter().map(|w| w.0).join("、");
                Ok(format!("找不到「{city}」的天氣資訊。可查詢的城市：{cities}"))
            }
        }
    }
}

/// Value of one unit in TWD.
const RATES: [(&str, f64); 6] = [
    ("TWD", 1.0),
    ("USD", 31.5),
    ("EUR", 34.2),
    ("JPY", 0.21),
    ("CNY", 4.35),
    ("HKD", 4.02),
];

fn rate(code: &str) -> Option<f64> {
    RATES.iter().find(|(c, _)| *c == code).map(|(_, r)| *r)
}

pub struct ConvertCurrency;

impl TextTool for ConvertCurrency {
    const NAME: &'static str = "convert_currency";
    const DESCRIPTION: &'static str = "匯率轉換。輸入格式：金額 來源貨幣 目標貨幣，例如：100 USD TWD";

    fn invoke(&self, input: &str) -> ChainResult<String> {
        let parts = input.split_whitespace().collect_vec();
        let &[amount, from, to] = parts.as_slice() else {
            return Err(ChainError::Parse(
                "格式錯誤。請使用格式：金額 來源貨幣 目標貨幣（例如：100 USD TWD）".into(),
            ));
        };

        let amount: f64 = amount
            .parse()
            .map_err(|_| ChainError::Parse("金額格式錯誤。請輸入有效的數字。".into()))?;
        let from = from.to_uppercase();
        let to = to.to_uppercase();

        let (Some(from_rate), Some(to_rate)) = (rate(&from), rate(&to)) else {
            let supported = RATES.iter().map(|(c, _)| *c).join("、");
            return Ok(format!("不支援的貨幣。支援的貨幣：{supported}"));
        };

        let converted = amount * from_rate / to_rate;
        Ok(format!(
            "匯率轉換結果：\n- 原始金額：{} {from}\n- 轉換金額：{} {to}\n- 匯率：1 {from} = {:.4} {to}",
            thousands(amount, 2),
            thousands(converted, 2),
            from_rate / to_rate,
        ))
    }
}

const TRANSLATIONS: [(&str, &str, &str); 7] = [
    ("hello", "中文", "你好"),
    ("thank you", "中文", "謝謝"),
    ("good morning", "中文", "早安"),
    ("你好", "english", "Hello"),
    ("你好", "英文", "Hello"),
    ("謝謝", "english", "Thank you"),
    ("謝謝", "英文", "Thank you"),
];

pub struct TranslateText;

impl TextTool for TranslateText {
    const NAME: &'static str = "translate_text";
    const DESCRIPTION: &'static str = "翻譯文字。輸入格式：文字|目標語言，例如：Hello|中文";

    fn invoke(&self, input: &str) -> ChainResult<String> {
        let Some((text, lang)) = input.split_once('|') else {
            return Err(ChainError::Parse(
                "格式錯誤。請使用格式：文字|目標語言（例如：Hello|中文）".into(),
            ));
        };
        let text = text.trim();
        let lang = lang.trim().to_lowercase();
        let key = text.to_lowercase();

        match TRANSLATIONS.iter().find(|(t, l, _)| *t == key && *l == lang) {
            Some((_, _, result)) => Ok(format!("翻譯結果：{text} → {result}")),
            None => Ok(format!("模擬翻譯：「{text}」翻譯成{lang}（實際應用中會調用翻譯 API）")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use googletest::prelude::*;

    #[test]
    fn time_uses_twelve_hour_clock() {
        let at = NaiveDate::from_ymd_opt(2024, 1, 15)
            .and_then(|d| d.and_hms_opt(14, 5, 0))
            .unwrap();
        assert_that!(format_time(at), eq("02:05 PM"));
    }

    #[test]
    fn arithmetic_respects_precedence() -> anyhow::Result<()> {
        assert_that!(evaluate("2 + 3 * 4")?, eq(14.0));
        assert_that!(evaluate("(2 + 3) * 4")?, eq(20.0));
        assert_that!(evaluate("-3 + 10 / 4")?, eq(-0.5));
        assert_that!(Calculator.invoke("123 * 456")?, eq("計算結果：123 * 456 = 56088"));
        Ok(())
    }

    #[test]
    fn arithmetic_rejects_bad_input() {
        assert_that!(evaluate("import os"), err(anything()));
        assert_that!(evaluate("2 +"), err(anything()));
        assert_that!(evaluate("(1 + 2"), err(anything()));
        assert_that!(evaluate("1 2"), err(anything()));
        assert_that!(
            evaluate("1 / 0").map_err(|e| e.to_string()),
            err(eq("錯誤：除數不能為零"))
        );
    }

    #[test]
    fn deep_nesting_is_an_error() {
        let parens = format!("{}1{}", "(".repeat(10_000), ")".repeat(10_000));
        assert_that!(
            evaluate(&parens),
            err(matches_pattern!(ChainError::Parse(eq("錯誤：表達式巢狀過深"))))
        );
        assert_that!(
            evaluate(&format!("{}1", "-".repeat(10_000))),
            err(matches_pattern!(ChainError::Parse(anything())))
        );
        assert_that!(evaluate(&format!("{}1{}", "(".repeat(10), ")".repeat(10))), ok(eq(1.0)));
    }

    #[test]
    fn weather_lists_cities_when_unknown() -> anyhow::Result<()> {
        assert_that!(GetWeather.invoke("台北")?, contains_substring("溫度：28°C"));
        assert_that!(
            GetWeather.invoke("東京")?,
            eq("找不到「東京」的天氣資訊。可查詢的城市：台北、台中、高雄、台南、新竹")
        );
        Ok(())
    }

    #[test]
    fn currency_converts_through_twd() -> anyhow::Result<()> {
        let reply = ConvertCurrency.invoke("100 usd TWD")?;
        assert_that!(reply, contains_substring("原始金額：100.00 USD"));
        assert_that!(reply, contains_substring("轉換金額：3,150.00 TWD"));
        assert_that!(reply, contains_substring("匯率：1 USD = 31.5000 TWD"));
        Ok(())
    }

    #[test]
    fn currency_input_needs_three_parts() {
        assert_that!(
            ConvertCurrency.invoke("100 USD"),
            err(matches_pattern!(ChainError::Parse(anything())))
        );
        assert_that!(
            ConvertCurrency.invoke("lots USD TWD"),
            err(matches_pattern!(ChainError::Parse(anything())))
        );
    }

    #[test]
    fn translation_uses_lookup_then_placeholder() -> anyhow::Result<()> {
        assert_that!(TranslateText.invoke("Hello|中文")?, eq("翻譯結果：Hello → 你好"));
        assert_that!(TranslateText.invoke("謝謝|English")?, eq("翻譯結果：謝謝 → Thank you"));
        assert_that!(TranslateText.invoke("早安|日文")?, starts_with("模擬翻譯：「早安」翻譯成日文"));
        assert_that!(TranslateText.invoke("Hello"), err(anything()));
        Ok(())
    }
}
