use async_trait::async_trait;
use shared::protocol::{Command, CommandKind, EventKind};

use super::unexpected;
use crate::{
    layout::LayoutFacade,
    saga::{CommandHandler, HandlerError, SagaContext},
    store::Mutation,
};

pub(super) const COMMANDS: &[&str] = &[
    "GDC.DASH/CMD.UI.SELECT_WIDGET",
    "GDC.DASH/CMD.UI.SET_FILTER_BAR_EXPANDED",
];

/// Transient presentation state. These commands never enter the undo history.
pub(super) struct UiHandler;

#[async_trait(?Send)]
impl CommandHandler for UiHandler {
    async fn handle(&self, ctx: &SagaContext, command: &Command) -> Result<EventKind, HandlerError> {
        match &command.kind {
            CommandKind::SelectWidget { widget_ref } => {
                if let Some(widget_ref) = widget_ref {
                    let state = ctx.state();
                    if !LayoutFacade::new(&state.layout).contains_ref(widget_ref) {
                        return Err(HandlerError::invalid(format!(
                            "widget {widget_ref} does not exist"
                        )));
                    }
                }
                ctx.commit(Mutation::SelectWidget {
                    widget_ref: widget_ref.clone(),
                })?;
                Ok(EventKind::WidgetSelected {
                    widget_ref: widget_ref.clone(),
                })
            }
            CommandKind::SetFilterBarExpanded { expanded } => {
                ctx.commit(Mutation::SetFilterBarExpanded {
                    expanded: *expanded,
                })?;
                Ok(EventKind::FilterBarExpandedChanged {
                    expanded: *expanded,
                })
            }
            _ => Err(unexpected(command)),
        }
    }
}
