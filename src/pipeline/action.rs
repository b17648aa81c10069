/// Closed set of model actions. Every commit enters the pipeline tagged
/// with one of these; middlewares branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Init,
    AddNodes,
    UpdateNode,
    UpdateNodes,
    MoveNodes,
    DeleteSelection,
    AddEdges,
    UpdateEdge,
    UpdateEdges,
    StartLinking,
    UpdateLinking,
    FinishLinking,
    CancelLinking,
    StartResize,
    ResizeNode,
    EndResize,
    RotateNode,
    Zoom,
    MoveViewport,
    ChangeSelection,
    UpdateMetadata,
    ApplyLayout,
}

impl ActionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActionType::Init => "init",
            ActionType::AddNodes => "addNodes",
            ActionType::UpdateNode => "updateNode",
            ActionType::UpdateNodes => "updateNodes",
            ActionType::MoveNodes => "moveNodes",
            ActionType::DeleteSelection => "deleteSelection",
            ActionType::AddEdges => "addEdges",
            ActionType::UpdateEdge => "updateEdge",
            ActionType::UpdateEdges => "updateEdges",
            ActionType::StartLinking => "startLinking",
            ActionType::UpdateLinking => "updateLinking",
            ActionType::FinishLinking => "finishLinking",
            ActionType::CancelLinking => "cancelLinking",
            ActionType::StartResize => "startResize",
            ActionType::ResizeNode => "resizeNode",
            ActionType::EndResize => "endResize",
            ActionType::RotateNode => "rotateNode",
            ActionType::Zoom => "zoom",
            ActionType::MoveViewport => "moveViewport",
            ActionType::ChangeSelection => "changeSelection",
            ActionType::UpdateMetadata => "updateMetadata",
            ActionType::ApplyLayout => "applyLayout",
        }
    }

    /// Actions that only touch the viewport and can never move geometry.
    pub fn is_viewport_only(self) -> bool {
        matches!(self, ActionType::Zoom | ActionType::MoveViewport)
    }
}
