//! 游戏会话与雷区布局
//!
//! 会话在创建时一次性生成地雷坐标，之后布局不可变。

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::SessionId;

/// 地雷坐标（从 0 开始）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MineCoordinate {
    pub row: u32,
    pub col: u32,
}

/// 雷区尺寸与地雷数量。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardDimensions {
    pub width: u32,
    pub height: u32,
    pub mines: u32,
}

impl BoardDimensions {
    pub fn cell_count(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl Default for BoardDimensions {
    fn default() -> Self {
        Self {
            width: 16,
            height: 30,
            mines: 99,
        }
    }
}

/// 在 `width x height` 的雷区中随机挑选 `mines` 个互不相同的格子。
pub fn generate_mine_layout<R: Rng + ?Sized>(
    board: BoardDimensions,
    rng: &mut R,
) -> DomainResult<Vec<MineCoordinate>> {
    if u64::from(board.mines) > board.cell_count() {
        return Err(DomainError::BoardTooSmall {
            width: board.width,
            height: board.height,
            mines: board.mines,
        });
    }

    let cells = board.cell_count() as usize;
    let layout = rand::seq::index::sample(rng, cells, board.mines as usize)
        .into_iter()
        .map(|index| MineCoordinate {
            row: (index / board.width as usize) as u32,
            col: (index % board.width as usize) as u32,
        })
        .collect();

    Ok(layout)
}

/// 游戏会话记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub name: String,
    pub coordinates: Vec<MineCoordinate>,
}

impl Session {
    pub fn new(
        id: SessionId,
        name: impl Into<String>,
        coordinates: Vec<MineCoordinate>,
    ) -> DomainResult<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::validation_error("name", "session name cannot be empty"));
        }

        Ok(Self {
            id,
            name,
            coordinates,
        })
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// 会话列表中展示的精简信息。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub name: String,
}
