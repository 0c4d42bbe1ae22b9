//! User-facing text.

use serde::Serialize;

/// Stable message carried by every "session expired" failure.
pub const SESSION_EXPIRED_MESSAGE: &str = "session expired, please log in again";

/// A toast-style notification for the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub title: &'static str,
    pub description: &'static str,
}

pub const SESSION_EXPIRED_NOTICE: Notice = Notice {
    title: "Sessão expirada",
    description: "Sua sessão expirou. Por favor, faça login novamente.",
};

pub const REQUEST_TIMEOUT_NOTICE: Notice = Notice {
    title: "Tempo esgotado",
    description: "O servidor demorou para responder. Tente novamente.",
};

pub const REQUEST_FAILED_NOTICE: Notice = Notice {
    title: "Erro de conexão",
    description: "Não foi possível concluir a operação. Tente novamente.",
};
