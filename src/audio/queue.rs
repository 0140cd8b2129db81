use chrono::{DateTime, Utc};
use serenity::model::id::UserId;
use std::{collections::VecDeque, fmt};
use tracing::{debug, info};

/// Referencia a un elemento pendiente: URL directa o texto de búsqueda.
///
/// Nunca se resuelve al encolar; el resolver la convierte en stream cuando
/// le toca sonar.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TrackRef {
    Url(String),
    Query(String),
}

impl TrackRef {
    /// Clasifica la entrada del usuario: `http(s)://...` es URL, el resto búsqueda.
    pub fn parse(input: &str) -> Self {
        let trimmed = input.trim();
        match url::Url::parse(trimmed) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                Self::Url(trimmed.to_string())
            }
            _ => Self::Query(trimmed.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Url(url) => url,
            Self::Query(query) => query,
        }
    }

    pub fn is_url(&self) -> bool {
        matches!(self, Self::Url(_))
    }
}

impl fmt::Display for TrackRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub reference: TrackRef,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
}

impl QueueItem {
    pub fn new(reference: TrackRef, requested_by: UserId) -> Self {
        Self {
            reference,
            requested_by,
            added_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("la cola está llena (máximo {max} canciones)")]
pub struct QueueFull {
    pub max: usize,
}

/// Vista acotada de la cola para mostrar al usuario.
#[derive(Debug, Clone)]
pub struct QueueListing {
    pub items: Vec<QueueItem>,
    /// Elementos que quedaron fuera de la vista.
    pub remaining: usize,
}

impl QueueListing {
    pub fn total(&self) -> usize {
        self.items.len() + self.remaining
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Cola FIFO de un guild. Ninguna operación hace I/O.
#[derive(Debug)]
pub struct SessionQueue {
    items: VecDeque<QueueItem>,
    max_size: usize,
}

impl SessionQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
        }
    }

    /// Agrega un elemento al final de la cola
    pub fn append(&mut self, item: QueueItem) -> Result<(), QueueFull> {
        self.ensure_space()?;
        info!("➕ Agregado a la cola: {}", item.reference);
        self.items.push_back(item);
        Ok(())
    }

    /// Agrega múltiples elementos (playlist); devuelve cuántos entraron
    pub fn append_all(&mut self, items: Vec<QueueItem>) -> usize {
        let available_space = self.max_size.saturating_sub(self.items.len());
        let to_add = items.len().min(available_space);

        self.items.extend(items.into_iter().take(to_add));

        info!("➕ Agregadas {} canciones a la cola", to_add);
        to_add
    }

    /// Coloca un elemento delante de todo lo encolado
    pub fn prepend(&mut self, item: QueueItem) -> Result<(), QueueFull> {
        self.ensure_space()?;
        info!("⏫ Agregado al frente de la cola: {}", item.reference);
        self.items.push_front(item);
        Ok(())
    }

    /// Devuelve al frente un elemento que ya estaba en la cola (sin límite)
    pub(crate) fn restore_front(&mut self, item: QueueItem) {
        debug!("↩️ Elemento devuelto al frente: {}", item.reference);
        self.items.push_front(item);
    }

    /// Obtiene el siguiente elemento (FIFO)
    pub fn pop_front(&mut self) -> Option<QueueItem> {
        let next = self.items.pop_front();
        match &next {
            Some(item) => debug!("➡️ Siguiente en cola (FIFO): {}", item.reference),
            None => debug!("📭 Cola vacía, no hay siguiente elemento"),
        }
        next
    }

    /// Primeros `n` elementos en orden, más cuántos quedan detrás
    pub fn peek_range(&self, n: usize) -> QueueListing {
        let shown = n.min(self.items.len());
        QueueListing {
            items: self.items.iter().take(shown).cloned().collect(),
            remaining: self.items.len() - shown,
        }
    }

    /// Descarta hasta `amount` elementos del frente
    pub fn skip(&mut self, amount: usize) -> usize {
        let skipped = amount.min(self.items.len());
        self.items.drain(..skipped);
        skipped
    }

    /// Limpia la cola; no toca el estado de reproducción
    pub fn clear(&mut self) -> usize {
        let cleared = self.items.len();
        self.items.clear();
        info!("🗑️ Cola limpiada: {} elementos removidos", cleared);
        cleared
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn ensure_space(&self) -> Result<(), QueueFull> {
        if self.items.len() >= self.max_size {
            return Err(QueueFull { max: self.max_size });
        }
        Ok(())
    }
}
