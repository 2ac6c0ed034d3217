//! Splitting replies to fit Discord's message length limit.

/// Prefix of every post that starts a new line of the reply.
pub const CONTINUED: &str = "(continued)\n";

/// Prefix of a post that carries on a line too long for a single message.
pub const CONTINUED_LINE: &str = "(continued mid-line)\n";

/// One piece of a reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    /// The piece carries on the previous piece's last line instead of starting a new one.
    pub mid_line: bool,
}

impl Chunk {
    fn new(text: String) -> Self {
        Self {
            text,
            mid_line: false,
        }
    }
}

/// Splits `text` into pieces of at most `limit` characters, breaking only between lines.
///
/// A single line longer than `limit` cannot be kept whole, so it is cut at character boundaries
/// and every piece after its first is flagged `mid_line`.  Joining the pieces with `\n`, or with
/// nothing before a `mid_line` piece, gives back `text`.
pub fn chunk(text: &str, limit: usize) -> Vec<Chunk> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    // Chunk being built and its length in characters
    let mut current: Option<(String, usize)> = None;

    for line in text.split('\n') {
        let line_len = line.chars().count();

        if line_len > limit {
            chunks.extend(current.take().map(|(chunk, _)| Chunk::new(chunk)));
            chunks.extend(hard_split(line, limit));
            continue;
        }

        current = match current.take() {
            Some((mut chunk, len)) if len + 1 + line_len <= limit => {
                chunk.push('\n');
                chunk.push_str(line);
                Some((chunk, len + 1 + line_len))
            }
            Some((chunk, _)) => {
                chunks.push(Chunk::new(chunk));
                Some((line.to_owned(), line_len))
            }
            None => Some((line.to_owned(), line_len)),
        };
    }

    chunks.extend(current.map(|(chunk, _)| Chunk::new(chunk)));
    chunks
}

fn hard_split(line: &str, limit: usize) -> Vec<Chunk> {
    line.chars()
        .collect::<Vec<_>>()
        .chunks(limit)
        .enumerate()
        .map(|(i, piece)| Chunk {
            text: piece.iter().collect(),
            mid_line: i > 0,
        })
        .collect()
}

/// The messages to post for `text`: every piece after the first is marked as a continuation, and
/// each message, marker included, fits in `limit` characters.
pub fn posts(text: &str, limit: usize) -> Vec<String> {
    let marker_len = CONTINUED.chars().count().max(CONTINUED_LINE.chars().count());
    let room = limit.saturating_sub(marker_len);
    chunk(text, room)
        .into_iter()
        .enumerate()
        .map(|(i, piece)| match (i, piece.mid_line) {
            (0, _) => piece.text,
            (_, true) => format!("{}{}", CONTINUED_LINE, piece.text),
            (_, false) => format!("{}{}", CONTINUED, piece.text),
        })
        .collect()
}
