//! C9: the completion router. Branches on a completed task's
//! [`NextDirective`] and turns it into a [`RoutingAction`] — the single
//! place in the crate that decides what happens after a task finishes.

use std::sync::Arc;

use crate::external::{Director, ExecutionResult, GoalAdvance, ReviewAction, SquadLookup, Workspace};
use crate::task::{NextDirective, RoutingAction, Task, TaskInput, TaskOutput, TaskStatus};

pub struct CompletionRouter {
    workspace: Arc<dyn Workspace>,
    director: Arc<dyn Director>,
    squads: SquadLookup,
}

impl CompletionRouter {
    pub fn new(workspace: Arc<dyn Workspace>, director: Arc<dyn Director>, squads: SquadLookup) -> Self {
        Self {
            workspace,
            director,
            squads,
        }
    }

    pub async fn route(&self, task: &Task, result: &ExecutionResult) -> anyhow::Result<RoutingAction> {
        if let Some(content) = &result.content {
            let squad = self.squads.squad_for(&task.to);
            self.workspace
                .write_output(squad, &task.to, &task.id, content)
                .await?;
        }

        match &task.next {
            NextDirective::Complete => {
                self.workspace.update_task_status(&task.id, TaskStatus::Completed).await?;
                Ok(RoutingAction::Complete { task_id: task.id.clone() })
            }
            NextDirective::Agent { skill } => {
                self.workspace.update_task_status(&task.id, TaskStatus::Completed).await?;
                let follow_up = self.synthesize_follow_up(task, skill, result);
                self.workspace.write_task(&follow_up).await?;
                Ok(RoutingAction::EnqueueTasks { tasks: vec![follow_up] })
            }
            NextDirective::DirectorReview => self.route_director_review(task).await,
            NextDirective::PipelineContinue { pipeline_id } => {
                self.workspace.update_task_status(&task.id, TaskStatus::Completed).await?;
                self.route_pipeline_continue(task, pipeline_id).await
            }
        }
    }

    /// `director_review` branch. The director owns every decision about
    /// whether/how to revise, reassign, or escalate — this only maps its
    /// verdict onto a [`RoutingAction`] and the matching workspace status;
    /// it never synthesizes revision tasks itself (that would duplicate
    /// policy the director already enforces, e.g. a max-revisions cutoff
    /// that shows up here only as an `escalate_human` action).
    async fn route_director_review(&self, task: &Task) -> anyhow::Result<RoutingAction> {
        let decision = self.director.review_completed_task(&task.id).await?;

        if let Some(learning) = &decision.learning {
            let entry = crate::external::Learning {
                task_id: task.id.clone(),
                message: decision.review.verdict.clone(),
                metadata: learning.as_object().cloned().unwrap_or_default(),
            };
            if let Err(e) = self.workspace.append_learning(entry).await {
                tracing::warn!(task_id = %task.id, error = %e, "failed to persist review learning");
            }
        }

        match decision.action {
            ReviewAction::Approve | ReviewAction::GoalComplete => {
                self.workspace.update_task_status(&task.id, TaskStatus::Approved).await?;
                Ok(RoutingAction::Complete { task_id: task.id.clone() })
            }
            ReviewAction::Revise => {
                self.workspace.update_task_status(&task.id, TaskStatus::Revision).await?;
                for next in &decision.next_tasks {
                    self.workspace.write_task(next).await?;
                }
                Ok(RoutingAction::EnqueueTasks { tasks: decision.next_tasks })
            }
            ReviewAction::PipelineNext => {
                self.workspace.update_task_status(&task.id, TaskStatus::Approved).await?;
                for next in &decision.next_tasks {
                    self.workspace.write_task(next).await?;
                }
                Ok(RoutingAction::EnqueueTasks { tasks: decision.next_tasks })
            }
            ReviewAction::RejectReassign => {
                self.workspace.update_task_status(&task.id, TaskStatus::Failed).await?;
                for next in &decision.next_tasks {
                    self.workspace.write_task(next).await?;
                }
                Ok(RoutingAction::EnqueueTasks { tasks: decision.next_tasks })
            }
            ReviewAction::EscalateHuman => {
                self.workspace.update_task_status(&task.id, TaskStatus::Blocked).await?;
                Ok(RoutingAction::DeadLetter {
                    task_id: task.id.clone(),
                    reason: "escalated_to_human".to_string(),
                })
            }
            ReviewAction::GoalIterate => match &task.goal_id {
                Some(goal_id) => match self.director.advance_goal(goal_id).await? {
                    GoalAdvance::Complete => {
                        self.workspace.update_task_status(&task.id, TaskStatus::Approved).await?;
                        Ok(RoutingAction::Complete { task_id: task.id.clone() })
                    }
                    GoalAdvance::Tasks { tasks } => {
                        self.workspace.update_task_status(&task.id, TaskStatus::Approved).await?;
                        for next in &tasks {
                            self.workspace.write_task(next).await?;
                        }
                        Ok(RoutingAction::EnqueueTasks { tasks })
                    }
                },
                None => {
                    self.workspace.update_task_status(&task.id, TaskStatus::Approved).await?;
                    Ok(RoutingAction::Complete { task_id: task.id.clone() })
                }
            },
        }
    }

    async fn route_pipeline_continue(&self, task: &Task, pipeline_id: &str) -> anyhow::Result<RoutingAction> {
        let goal_id = match &task.goal_id {
            Some(id) => id,
            None => {
                tracing::warn!(task_id = %task.id, pipeline_id, "pipeline_continue without a goal_id, treating as complete");
                return Ok(RoutingAction::Complete { task_id: task.id.clone() });
            }
        };

        match self.director.advance_goal(goal_id).await? {
            GoalAdvance::Complete => Ok(RoutingAction::Complete { task_id: task.id.clone() }),
            GoalAdvance::Tasks { tasks } => {
                for next in &tasks {
                    self.workspace.write_task(next).await?;
                }
                Ok(RoutingAction::EnqueueTasks { tasks })
            }
        }
    }

    /// Builds the follow-up task for an `agent{skill}` directive, per
    /// spec §4.6: a fresh id, the skill as its new owner, priority/
    /// deadline/goal/pipeline/goal-text/tags inherited from the parent,
    /// routed through another director review before it can complete.
    fn synthesize_follow_up(&self, parent: &Task, skill: &str, result: &ExecutionResult) -> Task {
        let squad = self.squads.squad_for(skill);
        let mut metadata = serde_json::Map::new();
        metadata.insert("previousTaskId".to_string(), parent.id.clone().into());
        metadata.insert("previousSkill".to_string(), parent.to.clone().into());

        let inputs = match &result.output_path {
            Some(path) => vec![TaskInput {
                path: path.clone(),
                description: format!("Output from {}", parent.to),
            }],
            None => vec![],
        };

        Task {
            id: format!("{}-{}", parent.id, skill),
            to: skill.to_string(),
            priority: parent.priority,
            goal_id: parent.goal_id.clone(),
            pipeline_id: parent.pipeline_id.clone(),
            status: TaskStatus::Pending,
            revision_count: 0,
            next: NextDirective::DirectorReview,
            output: TaskOutput { path: format!("{squad}/{skill}") },
            inputs,
            goal: parent.goal.clone(),
            requirements: Some(format!(
                "Continue pipeline work using output from {}. Goal: {}",
                parent.to,
                parent.goal.as_deref().unwrap_or("")
            )),
            tags: parent.tags.clone(),
            metadata,
            created_at: None,
            deadline: parent.deadline,
        }
    }
}
