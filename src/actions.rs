use crate::state::Screen;

#[derive(Debug, Clone)]
pub enum AppAction {
    // Auth
    CheckAuth,
    Login {
        username: String,
        password: String,
    },
    Register {
        username: String,
        email: String,
        password: String,
        first_name: String,
        last_name: String,
        gender: String,
    },
    Logout,

    // Navigation
    PushScreen {
        screen: Screen,
    },
    UpdateScreenStack {
        stack: Vec<Screen>,
    },

    // Directory / chat
    RefreshUsers,
    OpenConversation {
        peer_id: i64,
    },
    CloseConversation,
    SendMessage {
        peer_id: i64,
        content: String,
    },
    LoadOlderMessages {
        peer_id: i64,
    },

    // Forum
    LoadPosts,
    LoadOlderPosts,
    CreatePost {
        title: String,
        content: String,
        categories: Vec<String>,
    },
    OpenPost {
        post_id: i64,
    },
    ClosePost,
    LoadOlderComments,
    CreateComment {
        content: String,
    },

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes credentials or message bodies).
    pub fn tag(&self) -> &'static str {
        match self {
            AppAction::CheckAuth => "CheckAuth",
            AppAction::Login { .. } => "Login",
            AppAction::Register { .. } => "Register",
            AppAction::Logout => "Logout",

            AppAction::PushScreen { .. } => "PushScreen",
            AppAction::UpdateScreenStack { .. } => "UpdateScreenStack",

            AppAction::RefreshUsers => "RefreshUsers",
            AppAction::OpenConversation { .. } => "OpenConversation",
            AppAction::CloseConversation => "CloseConversation",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::LoadOlderMessages { .. } => "LoadOlderMessages",

            AppAction::LoadPosts => "LoadPosts",
            AppAction::LoadOlderPosts => "LoadOlderPosts",
            AppAction::CreatePost { .. } => "CreatePost",
            AppAction::OpenPost { .. } => "OpenPost",
            AppAction::ClosePost => "ClosePost",
            AppAction::LoadOlderComments => "LoadOlderComments",
            AppAction::CreateComment { .. } => "CreateComment",

            AppAction::ClearToast => "ClearToast",

            AppAction::Foregrounded => "Foregrounded",
        }
    }
}
