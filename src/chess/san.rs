//! Standard Algebraic Notation helpers built on top of the `chess` crate's
//! move generator. The crate itself only speaks coordinate (UCI-style)
//! moves, so SAN production and parsing live here.

use chess::{Board, ChessMove, MoveGen, Piece, Square};

fn piece_letter(piece: Piece) -> &'static str {
    match piece {
        Piece::Pawn => "",
        Piece::Knight => "N",
        Piece::Bishop => "B",
        Piece::Rook => "R",
        Piece::Queen => "Q",
        Piece::King => "K",
    }
}

fn is_castle(board: &Board, mv: ChessMove) -> Option<&'static str> {
    if board.piece_on(mv.get_source()) != Some(Piece::King) {
        return None;
    }
    let file_delta = mv.get_dest().get_file().to_index() as i8 - mv.get_source().get_file().to_index() as i8;
    match file_delta {
        2 => Some("O-O"),
        -2 => Some("O-O-O"),
        _ => None,
    }
}

fn is_capture(board: &Board, mv: ChessMove) -> bool {
    if board.piece_on(mv.get_dest()).is_some() {
        return true;
    }
    // En passant: a pawn move to an empty square on a different file.
    board.piece_on(mv.get_source()) == Some(Piece::Pawn)
        && mv.get_source().get_file() != mv.get_dest().get_file()
}

/// Render `mv` (already known to be legal in `board`) as SAN, including the
/// trailing `+`/`#` suffix and disambiguation against other legal moves that
/// share the same destination and piece type.
pub fn to_san(board: &Board, mv: ChessMove) -> String {
    let mut san = String::new();

    if let Some(castle) = is_castle(board, mv) {
        san.push_str(castle);
    } else {
        let piece = board.piece_on(mv.get_source()).unwrap_or(Piece::Pawn);
        let capture = is_capture(board, mv);

        san.push_str(piece_letter(piece));

        if piece == Piece::Pawn {
            if capture {
                san.push(file_char(mv.get_source()));
            }
        } else {
            san.push_str(&disambiguation(board, mv, piece));
        }

        if capture {
            san.push('x');
        }
        san.push_str(&mv.get_dest().to_string());

        if let Some(promo) = mv.get_promotion() {
            san.push('=');
            san.push_str(piece_letter(promo));
        }
    }

    let next = board.make_move_new(mv);
    if *next.checkers() != chess::EMPTY {
        if MoveGen::new_legal(&next).count() == 0 {
            san.push('#');
        } else {
            san.push('+');
        }
    }

    san
}

fn file_char(sq: Square) -> char {
    (b'a' + sq.get_file().to_index() as u8) as char
}

fn rank_char(sq: Square) -> char {
    (b'1' + sq.get_rank().to_index() as u8) as char
}

/// Minimal disambiguation: add source file, then source rank, then both,
/// only as needed to distinguish from other legal moves of the same piece
/// landing on the same square.
fn disambiguation(board: &Board, mv: ChessMove, piece: Piece) -> String {
    let others: Vec<ChessMove> = MoveGen::new_legal(board)
        .filter(|m| {
            *m != mv
                && m.get_dest() == mv.get_dest()
                && board.piece_on(m.get_source()) == Some(piece)
        })
        .collect();

    if others.is_empty() {
        return String::new();
    }

    let same_file = others
        .iter()
        .any(|m| m.get_source().get_file() == mv.get_source().get_file());
    let same_rank = others
        .iter()
        .any(|m| m.get_source().get_rank() == mv.get_source().get_rank());

    if !same_file {
        file_char(mv.get_source()).to_string()
    } else if !same_rank {
        rank_char(mv.get_source()).to_string()
    } else {
        mv.get_source().to_string()
    }
}

/// Normalize a SAN string for comparison: drop check/mate/annotation
/// suffixes and any stray whitespace.
fn normalize(input: &str) -> String {
    input
        .trim()
        .trim_end_matches(['+', '#', '!', '?'])
        .replace("0-0-0", "O-O-O")
        .replace("0-0", "O-O")
}

/// Find the legal move in `board` whose SAN matches `input`, ignoring
/// check/mate suffixes.
pub fn from_san(board: &Board, input: &str) -> Option<ChessMove> {
    let target = normalize(input);
    MoveGen::new_legal(board).find(|mv| normalize(&to_san(board, *mv)) == target)
}
