//! Weekly operating schedule and its estimated energy savings

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Usage samples required before savings are estimated
pub const MIN_USAGE_SAMPLES: usize = 24;
/// Budgets below this downgrade high-priority days
pub const LOW_BUDGET: f64 = 50.0;

const MIN_SAVINGS: f64 = 10.0;
const MAX_SAVINGS: f64 = 40.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Off,
    Low,
    Medium,
    High,
}

impl Priority {
    /// Equivalent full-power hours of one day at this priority.
    fn weighted_hours(self) -> f64 {
        match self {
            Priority::Off => 0.0,
            Priority::Low => 8.0 * 0.3,
            Priority::Medium => 10.0 * 0.6,
            Priority::High => 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Weekday::Monday => "monday",
            Weekday::Tuesday => "tuesday",
            Weekday::Wednesday => "wednesday",
            Weekday::Thursday => "thursday",
            Weekday::Friday => "friday",
            Weekday::Saturday => "saturday",
            Weekday::Sunday => "sunday",
        }
    }

    pub fn is_weekend(&self) -> bool {
        matches!(self, Weekday::Saturday | Weekday::Sunday)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaySchedule {
    pub start: &'static str,
    pub end: &'static str,
    pub priority: Priority,
}

impl DaySchedule {
    const OFF: DaySchedule = DaySchedule {
        start: "00:00",
        end: "00:00",
        priority: Priority::Off,
    };
}

/// Class timetable hints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClassSchedule {
    #[serde(default)]
    pub weekends: bool,
}

/// Caller constraints on the schedule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScheduleConstraints {
    #[serde(default)]
    pub class_schedule: Option<ClassSchedule>,
    #[serde(default)]
    pub energy_budget: Option<f64>,
}

/// One entry per weekday, Monday first. Serializes as a map keyed by day name.
#[derive(Debug, Clone, PartialEq)]
pub struct WeeklySchedule {
    days: [DaySchedule; 7],
}

impl WeeklySchedule {
    /// Weekday office hours, a shorter Saturday and Sunday off.
    pub fn base() -> Self {
        let weekday = DaySchedule {
            start: "08:00",
            end: "18:00",
            priority: Priority::High,
        };
        let saturday = DaySchedule {
            start: "09:00",
            end: "17:00",
            priority: Priority::Medium,
        };
        Self {
            days: [
                weekday.clone(),
                weekday.clone(),
                weekday.clone(),
                weekday.clone(),
                weekday,
                saturday,
                DaySchedule::OFF,
            ],
        }
    }

    pub fn day(&self, day: Weekday) -> &DaySchedule {
        &self.days[day as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (Weekday, &DaySchedule)> {
        Weekday::ALL.into_iter().zip(self.days.iter())
    }

    /// Apply `constraints` to this schedule.
    pub fn constrained(mut self, constraints: &ScheduleConstraints) -> Self {
        if let Some(classes) = &constraints.class_schedule {
            if !classes.weekends {
                for day in Weekday::ALL.into_iter().filter(Weekday::is_weekend) {
                    self.days[day as usize] = DaySchedule::OFF;
                }
            }
        }

        if let Some(budget) = constraints.energy_budget {
            if budget < LOW_BUDGET {
                for day in self.days.iter_mut().filter(|d| d.priority == Priority::High) {
                    day.priority = Priority::Medium;
                }
            }
        }

        self
    }

    /// Estimated savings in percent against running flat out.
    ///
    /// Returns 0 without a day of hourly usage; otherwise the estimate is
    /// bounded to 10..=40 and rounded to two decimals.
    pub fn energy_savings(&self, historical_usage: &[f64]) -> f64 {
        if historical_usage.len() < MIN_USAGE_SAMPLES {
            return 0.0;
        }

        let weighted: f64 = self.days.iter().map(|d| d.priority.weighted_hours()).sum();
        let total = 24.0 * self.days.len() as f64;
        let savings = ((1.0 - weighted / total) * 100.0).clamp(MIN_SAVINGS, MAX_SAVINGS);

        (savings * 100.0).round() / 100.0
    }
}

impl Serialize for WeeklySchedule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.days.len()))?;
        for (day, schedule) in self.iter() {
            map.serialize_entry(day.as_str(), schedule)?;
        }
        map.end()
    }
}

/// Build the schedule for `constraints`.
pub fn optimize(constraints: &ScheduleConstraints) -> WeeklySchedule {
    WeeklySchedule::base().constrained(constraints)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_schedule() {
        let schedule = optimize(&ScheduleConstraints::default());
        assert_eq!(schedule.day(Weekday::Monday).priority, Priority::High);
        assert_eq!(schedule.day(Weekday::Saturday).priority, Priority::Medium);
        assert_eq!(schedule.day(Weekday::Saturday).start, "09:00");
        assert_eq!(schedule.day(Weekday::Sunday).priority, Priority::Off);
    }

    #[test]
    fn test_class_schedule_closes_weekend() {
        let constraints = ScheduleConstraints {
            class_schedule: Some(ClassSchedule { weekends: false }),
            energy_budget: None,
        };
        let schedule = optimize(&constraints);
        assert_eq!(schedule.day(Weekday::Saturday), &DaySchedule::OFF);
        assert_eq!(schedule.day(Weekday::Friday).priority, Priority::High);

        let open = ScheduleConstraints {
            class_schedule: Some(ClassSchedule { weekends: true }),
            energy_budget: None,
        };
        assert_eq!(optimize(&open).day(Weekday::Saturday).priority, Priority::Medium);
    }

    #[test]
    fn test_low_budget_downgrades_high_days() {
        let constraints = ScheduleConstraints {
            class_schedule: None,
            energy_budget: Some(30.0),
        };
        let schedule = optimize(&constraints);
        assert!(schedule.iter().all(|(_, d)| d.priority != Priority::High));
        assert_eq!(schedule.day(Weekday::Wednesday).priority, Priority::Medium);
    }

    #[test]
    fn test_energy_savings_bounds() {
        let schedule = optimize(&ScheduleConstraints::default());
        assert_eq!(schedule.energy_savings(&[1.0; 23]), 0.0);

        let savings = schedule.energy_savings(&[1.0; 24]);
        assert!((10.0..=40.0).contains(&savings));
    }

    #[test]
    fn test_serializes_as_day_map() {
        let value = serde_json::to_value(optimize(&ScheduleConstraints::default())).unwrap();
        assert_eq!(value["monday"]["priority"], "high");
        assert_eq!(value["sunday"]["end"], "00:00");
        assert_eq!(value.as_object().map(|m| m.len()), Some(7));
    }
}
