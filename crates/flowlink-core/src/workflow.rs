// ── Workflow navigation ──
//
// Convenience layer over the proxies for the "workflow" rules namespace.
// The workflow root keeps an ordered `task_list` state field naming its
// tasks; the tasks themselves are instances of the `task_object`
// collection. Dependency edges are not stored explicitly — each task
// declares `inputs` and `outputs`, and two tasks are connected when one's
// outputs intersect the other's inputs.

use serde_json::Value;

use crate::error::CoreError;
use crate::proxy::ObjectProxy;
use crate::session::Session;

const WORKFLOW_RULES: &str = "workflow";
const TASK_COLLECTION: &str = "task_object";

/// Navigator for the solver's workflow task graph.
#[derive(Clone)]
pub struct Workflow {
    root: ObjectProxy,
}

impl Workflow {
    /// Bind to the session's `"workflow"` namespace.
    pub fn new(session: &Session) -> Self {
        Self {
            root: session.root(WORKFLOW_RULES),
        }
    }

    /// The workflow root proxy.
    pub fn root(&self) -> &ObjectProxy {
        &self.root
    }

    /// Task display names, in workflow order.
    pub async fn task_names(&self) -> Result<Vec<String>, CoreError> {
        let state = self.root.get_state().await?;
        Ok(string_list(&state, "task_list"))
    }

    /// All tasks, in workflow order.
    pub async fn tasks(&self) -> Result<Vec<Task>, CoreError> {
        Ok(self
            .task_names()
            .await?
            .into_iter()
            .map(|name| Task {
                workflow: self.clone(),
                name,
            })
            .collect())
    }

    /// Look up a task by display name.
    pub async fn task(&self, display_name: &str) -> Result<Task, CoreError> {
        if !self.task_names().await?.iter().any(|n| n == display_name) {
            return Err(CoreError::not_found(display_name, self.root.path().to_wire()));
        }
        Ok(Task {
            workflow: self.clone(),
            name: display_name.to_owned(),
        })
    }
}

/// One task in the workflow graph, addressed by display name.
#[derive(Clone)]
pub struct Task {
    workflow: Workflow,
    name: String,
}

impl Task {
    pub fn display_name(&self) -> &str {
        &self.name
    }

    /// The task's underlying object proxy.
    pub async fn object(&self) -> Result<ObjectProxy, CoreError> {
        self.workflow
            .root
            .collection(TASK_COLLECTION)
            .await?
            .get(&self.name)
            .await
    }

    /// Full task state.
    pub async fn state(&self) -> Result<Value, CoreError> {
        self.object().await?.get_state().await
    }

    /// The task's argument mapping, `Null` when it has none.
    pub async fn arguments(&self) -> Result<Value, CoreError> {
        let state = self.state().await?;
        Ok(state.get("arguments").cloned().unwrap_or(Value::Null))
    }

    /// Data names this task consumes.
    pub async fn inputs(&self) -> Result<Vec<String>, CoreError> {
        Ok(string_list(&self.state().await?, "inputs"))
    }

    /// Data names this task produces.
    pub async fn outputs(&self) -> Result<Vec<String>, CoreError> {
        Ok(string_list(&self.state().await?, "outputs"))
    }

    /// Tasks whose outputs feed this task's inputs, in workflow order.
    pub async fn upstream_tasks(&self) -> Result<Vec<Task>, CoreError> {
        let inputs = self.inputs().await?;
        self.related(|other_outputs, _| intersects(other_outputs, &inputs))
            .await
    }

    /// Tasks consuming this task's outputs, in workflow order.
    pub async fn downstream_tasks(&self) -> Result<Vec<Task>, CoreError> {
        let outputs = self.outputs().await?;
        self.related(|_, other_inputs| intersects(&outputs, other_inputs))
            .await
    }

    /// The task after this one in workflow order.
    pub async fn next_task(&self) -> Result<Option<Task>, CoreError> {
        self.sibling(1).await
    }

    /// The task before this one in workflow order.
    pub async fn previous_task(&self) -> Result<Option<Task>, CoreError> {
        self.sibling(-1).await
    }

    async fn sibling(&self, offset: isize) -> Result<Option<Task>, CoreError> {
        let names = self.workflow.task_names().await?;
        let Some(pos) = names.iter().position(|n| *n == self.name) else {
            return Err(CoreError::not_found(
                &self.name,
                self.workflow.root.path().to_wire(),
            ));
        };
        let Some(target) = pos.checked_add_signed(offset) else {
            return Ok(None);
        };
        Ok(names.get(target).map(|name| Task {
            workflow: self.workflow.clone(),
            name: name.clone(),
        }))
    }

    /// Siblings selected by an edge predicate over (their outputs, their
    /// inputs), preserving workflow order and skipping this task itself.
    async fn related(
        &self,
        connected: impl Fn(&[String], &[String]) -> bool,
    ) -> Result<Vec<Task>, CoreError> {
        let mut related = Vec::new();
        for task in self.workflow.tasks().await? {
            if task.name == self.name {
                continue;
            }
            let state = task.state().await?;
            let outputs = string_list(&state, "outputs");
            let inputs = string_list(&state, "inputs");
            if connected(&outputs, &inputs) {
                related.push(task);
            }
        }
        Ok(related)
    }
}

fn string_list(state: &Value, field: &str) -> Vec<String> {
    state
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default()
}

fn intersects(a: &[String], b: &[String]) -> bool {
    a.iter().any(|item| b.contains(item))
}
