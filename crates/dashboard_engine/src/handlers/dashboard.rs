use async_trait::async_trait;
use shared::{
    domain::{DashboardDefinition, ObjRef},
    error::{ApiError, ErrorCode},
    protocol::{Command, CommandKind, EventKind},
};
use tracing::debug;

use super::unexpected;
use crate::{
    saga::{CommandHandler, HandlerError, SagaContext},
    store::Mutation,
};

pub(super) const COMMANDS: &[&str] = &[
    "GDC.DASH/CMD.INITIALIZE",
    "GDC.DASH/CMD.SAVE",
    "GDC.DASH/CMD.SAVEAS",
    "GDC.DASH/CMD.RENAME",
    "GDC.DASH/CMD.CHANGE_METADATA",
    "GDC.DASH/CMD.RESET",
];

/// Loading, persisting and describing the dashboard as a whole.
pub(super) struct DashboardHandler;

#[async_trait(?Send)]
impl CommandHandler for DashboardHandler {
    async fn handle(&self, ctx: &SagaContext, command: &Command) -> Result<EventKind, HandlerError> {
        match &command.kind {
            CommandKind::Initialize { dashboard } => initialize(ctx, dashboard.as_ref()).await,
            CommandKind::Save {} => save(ctx).await,
            CommandKind::SaveAs {
                title,
                switch_to_copy,
            } => save_as(ctx, command, title.as_deref(), *switch_to_copy).await,
            CommandKind::Rename { title } => {
                if title.trim().is_empty() {
                    return Err(HandlerError::invalid("dashboard title must not be empty"));
                }
                let previous = ctx.state().descriptor.title.clone();
                ctx.commit(Mutation::Rename {
                    title: title.clone(),
                })?;
                ctx.record_undo(
                    command.clone(),
                    vec![CommandKind::Rename { title: previous }.into()],
                );
                Ok(EventKind::Renamed {
                    title: title.clone(),
                })
            }
            CommandKind::ChangeMetadata {
                description,
                tags,
                share_status,
            } => {
                if description.is_none() && tags.is_none() && share_status.is_none() {
                    return Err(HandlerError::invalid("no metadata field to change"));
                }
                let previous = ctx.state().descriptor;
                ctx.commit(Mutation::ChangeMetadata {
                    description: description.clone(),
                    tags: tags.clone(),
                    share_status: *share_status,
                })?;
                ctx.record_undo(
                    command.clone(),
                    vec![CommandKind::ChangeMetadata {
                        description: Some(previous.description.clone()),
                        tags: Some(previous.tags.clone()),
                        share_status: Some(previous.share_status),
                    }
                    .into()],
                );
                Ok(EventKind::MetadataChanged {
                    descriptor: (*ctx.state().descriptor).clone(),
                })
            }
            CommandKind::Reset {} => {
                ctx.commit(Mutation::ResetToPersisted)?;
                ctx.ledger().clear();
                Ok(EventKind::Reset {
                    dashboard: ctx.state().definition(),
                })
            }
            _ => Err(unexpected(command)),
        }
    }
}

async fn initialize(
    ctx: &SagaContext,
    dashboard: Option<&ObjRef>,
) -> Result<EventKind, HandlerError> {
    ctx.queries().clear();
    let definition = async {
        match dashboard {
            Some(dashboard) => ctx
                .backend()
                .get_dashboard(dashboard)
                .await
                .map_err(HandlerError::from),
            None => Ok(DashboardDefinition::default()),
        }
    };
    let attributes = async {
        ctx.queries()
            .catalog_attributes()
            .await
            .map_err(HandlerError::from)
    };
    let (definition, attributes) = ctx
        .call(async { futures::try_join!(definition, attributes) })
        .await?;

    let catalog_attributes = attributes.len();
    debug!(
        dashboard = ?dashboard,
        sections = definition.layout.sections.len(),
        catalog_attributes,
        "dashboard loaded"
    );
    ctx.commit(Mutation::Hydrate {
        definition,
        attributes,
    })?;
    ctx.ledger().clear();
    Ok(EventKind::Initialized {
        dashboard: ctx.state().definition(),
        catalog_attributes,
    })
}

async fn save(ctx: &SagaContext) -> Result<EventKind, HandlerError> {
    let definition = ctx.state().definition();
    if definition.descriptor.is_locked {
        return Err(HandlerError::Failed(ApiError::new(
            ErrorCode::Forbidden,
            "dashboard is locked",
        )));
    }
    let new_dashboard = definition.descriptor.dashboard_ref.is_none();
    let saved = ctx
        .call(ctx.backend().save_dashboard(&definition))
        .await?;
    let dashboard_ref = saved_ref(&saved)?;
    ctx.commit(Mutation::MarkSaved { definition: saved })?;
    Ok(EventKind::Saved {
        dashboard_ref,
        new_dashboard,
    })
}

async fn save_as(
    ctx: &SagaContext,
    command: &Command,
    title: Option<&str>,
    switch_to_copy: bool,
) -> Result<EventKind, HandlerError> {
    let mut copy = ctx.state().definition();
    copy.descriptor.title = match title {
        Some(title) => title.to_string(),
        None => format!("Copy of {}", copy.descriptor.title),
    };
    copy.descriptor.dashboard_ref = None;
    copy.descriptor.is_locked = false;

    let created = ctx.call(ctx.backend().create_dashboard(&copy)).await?;
    let dashboard_ref = saved_ref(&created)?;
    if switch_to_copy {
        ctx.commit(Mutation::MarkSaved {
            definition: created,
        })?;
        ctx.record_not_undoable(command.clone(), "the dashboard switched to a saved copy");
    }
    Ok(EventKind::CopySaved {
        dashboard_ref,
        switched: switch_to_copy,
    })
}

fn saved_ref(saved: &DashboardDefinition) -> Result<ObjRef, HandlerError> {
    saved.descriptor.dashboard_ref.clone().ok_or_else(|| {
        HandlerError::Failed(ApiError::internal("backend returned a dashboard without a ref"))
    })
}
