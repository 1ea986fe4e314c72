//! 任务类型模型
//! 价格、启用状态、执行倍数与创建时段

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// 关键词搜索浏览类型，唯一允许携带关键词的任务类型
pub const SEARCH_BROWSE: &str = "search_browse";

/// 同一设备 24 小时内不能重复执行同一 SKU 的任务类型
pub const ANTI_DUPLICATE_TYPES: [&str; 3] = ["add_to_cart", "follow_shop", "follow_product"];

/// 是否需要同 SKU 防重
pub fn requires_anti_duplicate(type_code: &str) -> bool {
    ANTI_DUPLICATE_TYPES.contains(&type_code)
}

/// 任务类型
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TaskType {
    pub id: i64,
    pub type_code: String,
    pub type_name: String,
    /// 单次执行价格（京豆）
    pub jingdou_price: i64,
    pub is_active: bool,
    /// 一次设备回报折算的执行次数
    pub execute_multiplier: i32,
    pub time_slot1_start: Option<String>,
    pub time_slot1_end: Option<String>,
    pub time_slot2_start: Option<String>,
    pub time_slot2_end: Option<String>,
    pub is_system_preset: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskType {
    /// 执行倍数，非法值按 1 处理
    pub fn multiplier(&self) -> i32 {
        self.execute_multiplier.max(1)
    }

    /// 已配置的创建时段
    pub fn time_windows(&self) -> Result<Vec<TimeWindow>, TimeWindowError> {
        let slots = [
            (&self.time_slot1_start, &self.time_slot1_end),
            (&self.time_slot2_start, &self.time_slot2_end),
        ];

        let mut windows = Vec::new();
        for (start, end) in slots {
            match (start.as_deref(), end.as_deref()) {
                (Some(s), Some(e)) if !s.trim().is_empty() && !e.trim().is_empty() => {
                    windows.push(TimeWindow::parse(s, e)?);
                }
                _ => {}
            }
        }
        Ok(windows)
    }
}

/// 一天中的时段 [start, end]，两端包含，精确到分钟
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid time slot: {0}")]
pub struct TimeWindowError(pub String);

impl TimeWindow {
    /// 解析 "HH:MM" 格式的起止时间
    pub fn parse(start: &str, end: &str) -> Result<Self, TimeWindowError> {
        let parse = |s: &str| {
            NaiveTime::parse_from_str(s.trim(), "%H:%M")
                .map_err(|_| TimeWindowError(s.to_string()))
        };
        Ok(Self {
            start: parse(start)?,
            end: parse(end)?,
        })
    }

    /// 判断时刻是否落在时段内（秒被截断，12:00:59 视为 12:00）
    pub fn contains(&self, time: NaiveTime) -> bool {
        let minute = NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time);
        if self.start <= self.end {
            minute >= self.start && minute <= self.end
        } else {
            // 跨零点
            minute >= self.start || minute <= self.end
        }
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start.format("%H:%M"), self.end.format("%H:%M"))
    }
}

/// 时段的展示文本，例如 "08:00-12:00, 14:00-18:00"
pub fn describe_windows(windows: &[TimeWindow]) -> String {
    windows
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// 时段校验结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotCheck {
    Allowed,
    /// 不在任何时段内，附带允许的时段描述
    Denied(String),
}

/// 校验当前本地时刻是否允许创建任务，未配置时段时不限制
pub fn check_time_slots(windows: &[TimeWindow], local_time: NaiveTime) -> SlotCheck {
    if windows.is_empty() || windows.iter().any(|w| w.contains(local_time)) {
        SlotCheck::Allowed
    } else {
        SlotCheck::Denied(describe_windows(windows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_type(slot1: Option<(&str, &str)>, slot2: Option<(&str, &str)>) -> TaskType {
        TaskType {
            id: 1,
            type_code: "browse".to_string(),
            type_name: "浏览任务".to_string(),
            jingdou_price: 2,
            is_active: true,
            execute_multiplier: 1,
            time_slot1_start: slot1.map(|s| s.0.to_string()),
            time_slot1_end: slot1.map(|s| s.1.to_string()),
            time_slot2_start: slot2.map(|s| s.0.to_string()),
            time_slot2_end: slot2.map(|s| s.1.to_string()),
            is_system_preset: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    #[test]
    fn test_single_window_gating() {
        let windows = task_type(Some(("08:00", "12:00")), None).time_windows().unwrap();
        assert_eq!(check_time_slots(&windows, at(9, 30, 0)), SlotCheck::Allowed);
        assert_eq!(
            check_time_slots(&windows, at(13, 0, 0)),
            SlotCheck::Denied("08:00-12:00".to_string())
        );
    }

    #[test]
    fn test_window_bounds_are_inclusive_to_the_minute() {
        let window = TimeWindow::parse("08:00", "12:00").unwrap();
        assert!(window.contains(at(8, 0, 0)));
        assert!(window.contains(at(12, 0, 59)));
        assert!(!window.contains(at(12, 1, 0)));
        assert!(!window.contains(at(7, 59, 59)));
    }

    #[test]
    fn test_second_window_and_description() {
        let windows = task_type(Some(("08:00", "12:00")), Some(("14:00", "18:00")))
            .time_windows()
            .unwrap();
        assert_eq!(check_time_slots(&windows, at(15, 0, 0)), SlotCheck::Allowed);
        assert_eq!(
            check_time_slots(&windows, at(13, 0, 0)),
            SlotCheck::Denied("08:00-12:00, 14:00-18:00".to_string())
        );
    }

    #[test]
    fn test_no_windows_means_unrestricted() {
        let windows = task_type(None, None).time_windows().unwrap();
        assert!(windows.is_empty());
        assert_eq!(check_time_slots(&windows, at(3, 0, 0)), SlotCheck::Allowed);

        let blank = task_type(Some(("", "")), None).time_windows().unwrap();
        assert!(blank.is_empty());
    }

    #[test]
    fn test_overnight_window() {
        let window = TimeWindow::parse("22:00", "02:00").unwrap();
        assert!(window.contains(at(23, 15, 0)));
        assert!(window.contains(at(1, 0, 0)));
        assert!(!window.contains(at(12, 0, 0)));
    }

    #[test]
    fn test_invalid_window_is_rejected() {
        assert!(TimeWindow::parse("8am", "12:00").is_err());
        assert!(task_type(Some(("25:00", "26:00")), None).time_windows().is_err());
    }

    #[test]
    fn test_multiplier_floor() {
        let mut t = task_type(None, None);
        t.execute_multiplier = 0;
        assert_eq!(t.multiplier(), 1);
        t.execute_multiplier = 3;
        assert_eq!(t.multiplier(), 3);
    }

    #[test]
    fn test_anti_duplicate_types() {
        assert!(requires_anti_duplicate("add_to_cart"));
        assert!(requires_anti_duplicate("follow_shop"));
        assert!(requires_anti_duplicate("follow_product"));
        assert!(!requires_anti_duplicate("browse"));
    }
}
