use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Transform,
    Compute,
    Retrieve,
    Generate,
    Reason,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::Transform,
        TaskType::Compute,
        TaskType::Retrieve,
        TaskType::Generate,
        TaskType::Reason,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Transform => "transform",
            TaskType::Compute => "compute",
            TaskType::Retrieve => "retrieve",
            TaskType::Generate => "generate",
            TaskType::Reason => "reason",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|task| task.as_str() == value.trim().to_lowercase())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    #[serde(rename = "type")]
    pub task_type: TaskType,
    pub input: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub tasks: Vec<Task>,
    pub goal: String,
}

impl Plan {
    pub fn primary(&self) -> TaskType {
        self.tasks
            .first()
            .map(|task| task.task_type)
            .unwrap_or(TaskType::Reason)
    }
}

// Checked in this order; the first list with a hit decides the task type.
const RULES: &[(TaskType, &[&str])] = &[
    (
        TaskType::Transform,
        &[
            "translate",
            "rewrite",
            "rephrase",
            "paraphrase",
            "summarize",
            "summarise",
            "convert",
            "reformat",
            "simplify",
        ],
    ),
    (
        TaskType::Compute,
        &[
            "calculate",
            "compute",
            "solve",
            "how many",
            "how much",
            "sum of",
            "average",
            "percentage",
            "equation",
            "integral",
            "derivative",
        ],
    ),
    (
        TaskType::Retrieve,
        &[
            "search",
            "find",
            "look up",
            "lookup",
            "source",
            "cite",
            "citation",
            "reference",
            "according to",
            "what does the document",
            "in the docs",
        ],
    ),
    (
        TaskType::Generate,
        &[
            "write",
            "draft",
            "compose",
            "generate",
            "create",
            "story",
            "poem",
            "essay",
            "brainstorm",
        ],
    ),
];

/// Classifies a prompt into exactly one task.
pub fn plan_tasks(prompt: &str) -> Plan {
    let goal = prompt.trim().to_string();
    let lower = goal.to_lowercase();
    let task_type = RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(task_type, _)| *task_type)
        .unwrap_or(TaskType::Reason);
    Plan {
        tasks: vec![Task {
            id: "t1".to_string(),
            task_type,
            input: goal.clone(),
        }],
        goal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_matching_rule_wins() {
        // "translate" (transform) outranks "find" (retrieve)
        assert_eq!(
            plan_tasks("Find and translate this paragraph").primary(),
            TaskType::Transform
        );
        assert_eq!(plan_tasks("Calculate the sum of 4 and 5").primary(), TaskType::Compute);
        assert_eq!(
            plan_tasks("Search the docs for rent law").primary(),
            TaskType::Retrieve
        );
        assert_eq!(plan_tasks("Write a poem about tides").primary(), TaskType::Generate);
        assert_eq!(plan_tasks("Why is the sky blue?").primary(), TaskType::Reason);
    }

    #[test]
    fn exactly_one_task() {
        let plan = plan_tasks("  Is it legal to withhold rent?  ");
        assert_eq!(plan.tasks.len(), 1);
        assert_eq!(plan.tasks[0].id, "t1");
        assert_eq!(plan.goal, "Is it legal to withhold rent?");
        assert_eq!(plan.tasks[0].input, plan.goal);
    }

    #[test]
    fn task_names_roundtrip() {
        for task in TaskType::ALL {
            assert_eq!(TaskType::from_str(task.as_str()), Some(task));
        }
    }
}
