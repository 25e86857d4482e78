//! Fixed order, inventory and FAQ data for the shop assistant.

use indoc::indoc;
use itertools::Itertools;

use super::{TextTool, thousands};
use crate::error::ChainResult;

pub struct Order {
    pub order_id: &'static str,
    pub customer: &'static str,
    pub product: &'static str,
    pub quantity: u32,
    pub amount: u32,
    pub status: &'static str,
    pub date: &'static str,
    pub tracking: &'static str,
}

pub const ORDERS: [Order; 5] = [
    Order {
        order_id: "ORD001",
        customer: "王小明",
        product: "智慧型手機",
        quantity: 1,
        amount: 15000,
        status: "已出貨",
        date: "2024-01-15",
        tracking: "TW1234567890",
    },
    Order {
        order_id: "ORD002",
        customer: "李小華",
        product: "筆記型電腦",
        quantity: 1,
        amount: 35000,
        status: "處理中",
        date: "2024-01-20",
        tracking: "處理中，尚未出貨",
    },
    Order {
        order_id: "ORD003",
        customer: "張大同",
        product: "無線耳機",
        quantity: 2,
        amount: 6000,
        status: "已送達",
        date: "2024-01-10",
        tracking: "TW0987654321",
    },
    Order {
        order_id: "ORD004",
        customer: "陳美玲",
        product: "平板電腦",
        quantity: 1,
        amount: 18000,
        status: "已出貨",
        date: "2024-01-18",
        tracking: "TW1122334455",
    },
    Order {
        order_id: "ORD005",
        customer: "林志明",
        product: "智慧手錶",
        quantity: 1,
        amount: 8000,
        status: "已取消",
        date: "2024-01-12",
        tracking: "已取消",
    },
];

pub struct StockItem {
    pub name: &'static str,
    pub stock: u32,
    pub price: u32,
    pub category: &'static str,
}

pub const INVENTORY: [StockItem; 8] = [
    StockItem { name: "智慧型手機", stock: 50, price: 15000, category: "手機" },
    StockItem { name: "筆記型電腦", stock: 30, price: 35000, category: "電腦" },
    StockItem { name: "無線耳機", stock: 100, price: 3000, category: "配件" },
    StockItem { name: "平板電腦", stock: 45, price: 18000, category: "平板" },
    StockItem { name: "智慧手錶", stock: 80, price: 8000, category: "穿戴裝置" },
    StockItem { name: "藍牙喇叭", stock: 60, price: 2500, category: "配件" },
    StockItem { name: "充電器", stock: 200, price: 500, category: "配件" },
    StockItem { name: "保護殼", stock: 150, price: 300, category: "配件" },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StockStatus {
    InStock,
    Low,
    Out,
}

impl StockStatus {
    pub fn of(stock: u32) -> Self {
        match stock {
            0 => StockStatus::Out,
            1..=10 => StockStatus::Low,
            _ => StockStatus::InStock,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            StockStatus::InStock => "有貨",
            StockStatus::Low => "庫存不足",
            StockStatus::Out => "缺貨",
        }
    }

    fn badge(&self) -> &'static str {
        match self {
            StockStatus::InStock => "✅ 有貨",
            StockStatus::Low => "⚠️ 庫存不足",
            StockStatus::Out => "❌ 缺貨",
        }
    }
}

pub const FAQ: [(&str, &str); 5] = [
    (
        "退貨政策",
        indoc! {"
            退貨政策：
            - 商品到貨 7 天內可無條件退貨
            - 商品需保持全新狀態，包裝完整
            - 退貨運費由買家負擔（商品瑕疵除外）
            - 退款將在收到退貨後 3-5 個工作天內處理
        "},
    ),
    (
        "運送時間",
        indoc! {"
            運送時間：
            - 一般商品：3-5 個工作天送達
            - 偏遠地區：5-7 個工作天送達
            - 大型商品：7-10 個工作天送達
            - 提供宅配到府服務
        "},
    ),
    (
        "付款方式",
        indoc! {"
            付款方式：
            - 信用卡付款（支援 Visa、MasterCard、JCB）
            - ATM 轉帳
            - 超商代碼繳費
            - 貨到付款（需加收手續費 60 元）
        "},
    ),
    (
        "保固服務",
        indoc! {"
            保固服務：
            - 所有商品提供原廠保固
            - 手機、電腦類：1 年保固
            - 配件類：6 個月保固
            - 保固期內免費維修（人為損壞除外）
            - 提供到府收送服務
        "},
    ),
    (
        "會員優惠",
        indoc! {"
            會員優惠：
            - 註冊即享首購 9 折優惠
            - 消費滿 10,000 元升級銀卡會員（95 折）
            - 消費滿 50,000 元升級金卡會員（9 折）
            - 生日當月享額外 5% 折扣
            - 不定期會員專屬優惠活動
        "},
    ),
];

pub struct QueryOrder;

impl TextTool for QueryOrder {
    const NAME: &'static str = "query_order";
    const DESCRIPTION: &'static str = "查詢訂單資訊。輸入應該是訂單編號，例如：ORD001";

    fn invoke(&self, input: &str) -> ChainResult<String> {
        let order_id = input.trim().to_uppercase();

        let Some(order) = ORDERS.iter().find(|o| o.order_id == order_id) else {
            return Ok(format!("找不到訂單編號「{order_id}」。請確認訂單編號是否正確。"));
        };

        Ok(format!(
            "訂單資訊：\n- 訂單編號：{}\n- 客戶姓名：{}\n- 商品名稱：{}\n- 數量：{}\n- 金額：NT$ {}\n- 訂單狀態：{}\n- 訂購日期：{}\n- 物流追蹤：{}",
            order.order_id,
            order.customer,
            order.product,
            order.quantity,
            thousands(order.amount.into(), 0),
            order.status,
            order.date,
            order.tracking,
        ))
    }
}

pub struct CheckInventory;

impl TextTool for CheckInventory {
    const NAME: &'static str = "check_inventory";
    const DESCRIPTION: &'static str = "查詢商品庫存和價格資訊。輸入應該是商品名稱，例如：智慧型手機";

    fn invoke(&self, input: &str) -> ChainResult<String> {
        let name = input.trim();

        if let Some(item) = INVENTORY.iter().find(|i| i.name == name) {
            return Ok(format!(
                "商品庫存資訊：\n- 商品名稱：{}\n- 庫存數量：{} 件\n- 庫存狀態：{}\n- 商品價格：NT$ {}\n- 商品類別：{}",
                item.name,
                item.stock,
                StockStatus::of(item.stock).label(),
                thousands(item.price.into(), 0),
                item.category,
            ));
        }

        let similar = INVENTORY
            .iter()
            .filter(|i| !name.is_empty() && (i.name.contains(name) || name.contains(i.name)))
            .map(|i| format!("- {}", i.name))
            .collect_vec();

        if similar.is_empty() {
            Ok(format!("找不到商品「{name}」。請確認商品名稱是否正確。"))
        } else {
            Ok(format!("找不到「{name}」，您是否要查詢：\n{}", similar.join("\n")))
        }
    }
}

pub struct SearchFaq;

impl TextTool for SearchFaq {
    const NAME: &'static str = "search_faq";
    const DESCRIPTION: &'static str =
        "搜尋常見問題的答案。輸入應該是問題主題，例如：退貨政策、運送時間、付款方式";

    fn invoke(&self, input: &str) -> ChainResult<String> {
        let topic = input.trim();

        if let Some((_, answer)) = FAQ.iter().find(|(key, _)| *key == topic) {
            return Ok(answer.to_string());
        }

        if !topic.is_empty()
            && let Some((key, answer)) = FAQ
                .iter()
                .find(|(key, _)| key.contains(topic) || topic.contains(key))
        {
            return Ok(format!("關於「{key}」：\n{answer}"));
        }

        let topics = FAQ.iter().map(|(key, _)| format!("- {key}")).join("\n");
        Ok(format!("找不到關於「{topic}」的資訊。\n\n可查詢的主題：\n{topics}"))
    }
}

pub struct ListProducts;

impl TextTool for ListProducts {
    const NAME: &'static str = "list_products";
    const DESCRIPTION: &'static str = "列出所有可供選購的商品及其價格和庫存狀態。不需要輸入參數。";

    fn invoke(&self, _input: &str) -> ChainResult<String> {
        let lines = INVENTORY
            .iter()
            .map(|i| {
                format!(
                    "- {}：NT$ {} ({})",
                    i.name,
                    thousands(i.price.into(), 0),
                    StockStatus::of(i.stock).badge()
                )
            })
            .join("\n");
        Ok(format!("目前可供選購的商品：\n{lines}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use googletest::prelude::*;

    #[test]
    fn order_ids_are_normalized() -> anyhow::Result<()> {
        let reply = QueryOrder.invoke("  ord001 ")?;
        assert_that!(reply, contains_substring("客戶姓名：王小明"));
        assert_that!(reply, contains_substring("金額：NT$ 15,000"));
        assert_that!(reply, contains_substring("物流追蹤：TW1234567890"));
        Ok(())
    }

    #[test]
    fn unknown_order_is_reported_as_text() -> anyhow::Result<()> {
        let reply = QueryOrder.invoke("ORD999")?;
        assert_that!(reply, eq("找不到訂單編號「ORD999」。請確認訂單編號是否正確。"));
        Ok(())
    }

    #[test]
    fn stock_thresholds() {
        assert_that!(StockStatus::of(11).label(), eq("有貨"));
        assert_that!(StockStatus::of(10).label(), eq("庫存不足"));
        assert_that!(StockStatus::of(1).label(), eq("庫存不足"));
        assert_that!(StockStatus::of(0).label(), eq("缺貨"));
    }

    #[test]
    fn inventory_suggests_similar_names() -> anyhow::Result<()> {
        let reply = CheckInventory.invoke("電腦")?;
        assert_that!(reply, starts_with("找不到「電腦」，您是否要查詢："));
        assert_that!(reply, contains_substring("- 筆記型電腦"));
        assert_that!(reply, contains_substring("- 平板電腦"));

        let reply = CheckInventory.invoke("咖啡機")?;
        assert_that!(reply, eq("找不到商品「咖啡機」。請確認商品名稱是否正確。"));
        Ok(())
    }

    #[test]
    fn faq_falls_back_to_partial_then_topic_list() -> anyhow::Result<()> {
        assert_that!(SearchFaq.invoke("付款方式")?, starts_with("付款方式："));
        assert_that!(SearchFaq.invoke("退貨")?, starts_with("關於「退貨政策」："));

        let reply = SearchFaq.invoke("營業時間")?;
        assert_that!(reply, contains_substring("可查詢的主題："));
        assert_that!(reply, contains_substring("- 會員優惠"));
        Ok(())
    }

    #[test]
    fn product_list_covers_inventory() -> anyhow::Result<()> {
        let reply = ListProducts.invoke("")?;
        assert_that!(reply.lines().count(), eq(INVENTORY.len() + 1));
        assert_that!(reply, contains_substring("- 保護殼：NT$ 300 (✅ 有貨)"));
        Ok(())
    }
}
