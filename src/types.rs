//! Types Module
//!
//! クレート全体で使用する共通データ型を定義するモジュール。

/// セル座標（0始まり）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct CellCoord {
    pub row: u32,
    pub col: u32,
}

impl CellCoord {
    /// 新しい座標を生成
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// A1形式の文字列に変換（例: (0, 0) -> "A1"）
    #[allow(clippy::wrong_self_convention)]
    pub fn to_a1_notation(&self) -> String {
        let col_str = Self::col_index_to_letter(self.col);
        format!("{}{}", col_str, self.row + 1)
    }

    /// A1形式の文字列を解析（例: "B2" -> (1, 1)）
    ///
    /// `$`による絶対参照指定は無視します。
    ///
    /// # 戻り値
    ///
    /// * `Some(CellCoord)` - 解析に成功した場合
    /// * `None` - 列文字または行番号が欠けている、もしくは順序が不正な場合
    pub fn parse_a1(ref_str: &str) -> Option<Self> {
        let ref_str: String = ref_str.chars().filter(|c| *c != '$').collect();
        let split = ref_str.find(|c: char| c.is_ascii_digit())?;
        let (col_str, row_str) = ref_str.split_at(split);

        if col_str.is_empty() || !col_str.chars().all(|c| c.is_ascii_alphabetic()) {
            return None;
        }

        let col = Self::letter_to_col_index(col_str)?;

        // 行を数値に変換（1始まりなので0始まりに変換）
        let row = row_str.parse::<u32>().ok()?.checked_sub(1)?;

        Some(Self::new(row, col))
    }

    /// 列インデックスを文字列に変換（0 -> "A", 25 -> "Z", 26 -> "AA"）
    pub fn col_index_to_letter(mut col: u32) -> String {
        let mut result = String::new();
        loop {
            let remainder = col % 26;
            result.insert(0, (b'A' + remainder as u8) as char);
            if col < 26 {
                break;
            }
            col = col / 26 - 1;
        }
        result
    }

    /// 列文字を数値に変換（A=0, B=1, ..., Z=25, AA=26, ...）
    fn letter_to_col_index(col_str: &str) -> Option<u32> {
        let mut col: u32 = 0;
        for ch in col_str.chars() {
            let val = (ch.to_ascii_uppercase() as u32) - ('A' as u32) + 1;
            col = col.checked_mul(26)?.checked_add(val)?;
        }
        col.checked_sub(1)
    }
}

/// セル範囲（`<dimension ref="A1:D2"/>` 用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CellRange {
    pub start: CellCoord,
    pub end: CellCoord,
}

impl CellRange {
    /// 新しい範囲を生成
    pub fn new(start: CellCoord, end: CellCoord) -> Self {
        Self { start, end }
    }

    /// "A1:D2" または "A1" 形式の文字列を解析
    pub fn parse(ref_str: &str) -> Option<Self> {
        match ref_str.split_once(':') {
            Some((start, end)) => Some(Self::new(
                CellCoord::parse_a1(start)?,
                CellCoord::parse_a1(end)?,
            )),
            None => {
                let coord = CellCoord::parse_a1(ref_str)?;
                Some(Self::new(coord, coord))
            }
        }
    }

    /// 指定された座標を含むように範囲を広げる
    pub fn expand_to(&self, coord: CellCoord) -> Self {
        Self::new(
            CellCoord::new(self.start.row.min(coord.row), self.start.col.min(coord.col)),
            CellCoord::new(self.end.row.max(coord.row), self.end.col.max(coord.col)),
        )
    }

    /// A1形式の範囲文字列に変換
    #[allow(clippy::wrong_self_convention)]
    pub fn to_a1_notation(&self) -> String {
        if self.start == self.end {
            self.start.to_a1_notation()
        } else {
            format!(
                "{}:{}",
                self.start.to_a1_notation(),
                self.end.to_a1_notation()
            )
        }
    }
}
