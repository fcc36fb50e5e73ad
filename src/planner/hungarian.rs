//! Maximum-weight bipartite assignment (Hungarian algorithm, O(n³)).
//!
//! Weights are converted to costs `max - w` over a matrix padded to square
//! with zero-weight dummy rows/columns, then solved as min-cost assignment
//! with row/column potentials. Integer weights keep the optimum exact.

/// Assigns each row to at most one column maximizing the total weight.
///
/// `weights` is `rows × cols` (ragged rows are treated as zero-padded).
/// Returns, per row, the matched real column; rows matched to padding get `None`.
pub fn max_weight_assignment(weights: &[Vec<u32>]) -> Vec<Option<usize>> {
    let rows = weights.len();
    let cols = weights.iter().map(|r| r.len()).max().unwrap_or(0);
    if rows == 0 || cols == 0 {
        return vec![None; rows];
    }

    let n = rows.max(cols);
    let weight = |r: usize, c: usize| -> i64 {
        weights
            .get(r)
            .and_then(|row| row.get(c))
            .copied()
            .unwrap_or(0) as i64
    };
    let max_weight = (0..rows)
        .flat_map(|r| (0..cols).map(move |c| (r, c)))
        .map(|(r, c)| weight(r, c))
        .max()
        .unwrap_or(0);
    let cost = |r: usize, c: usize| max_weight - weight(r, c);

    let column_of_row = solve_min_cost(n, cost);
    column_of_row
        .into_iter()
        .take(rows)
        .map(|c| (c < cols).then_some(c))
        .collect()
}

/// Min-cost perfect matching on an `n × n` matrix; returns column per row
fn solve_min_cost(n: usize, cost: impl Fn(usize, usize) -> i64) -> Vec<usize> {
    const INF: i64 = i64::MAX / 4;

    // 1-based; index 0 is the virtual root of each augmenting search
    let mut u = vec![0i64; n + 1];
    let mut v = vec![0i64; n + 1];
    let mut row_of_col = vec![0usize; n + 1];
    let mut way = vec![0usize; n + 1];

    for row in 1..=n {
        row_of_col[0] = row;
        let mut col0 = 0usize;
        let mut min_slack = vec![INF; n + 1];
        let mut used = vec![false; n + 1];

        loop {
            used[col0] = true;
            let row0 = row_of_col[col0];
            let mut delta = INF;
            let mut col1 = 0usize;

            for col in 1..=n {
                if used[col] {
                    continue;
                }
                let reduced = cost(row0 - 1, col - 1) - u[row0] - v[col];
                if reduced < min_slack[col] {
                    min_slack[col] = reduced;
                    way[col] = col0;
                }
                if min_slack[col] < delta {
                    delta = min_slack[col];
                    col1 = col;
                }
            }

            for col in 0..=n {
                if used[col] {
                    u[row_of_col[col]] += delta;
                    v[col] -= delta;
                } else {
                    min_slack[col] -= delta;
                }
            }

            col0 = col1;
            if row_of_col[col0] == 0 {
                break;
            }
        }

        // Flip the augmenting path
        loop {
            let prev = way[col0];
            row_of_col[col0] = row_of_col[prev];
            col0 = prev;
            if col0 == 0 {
                break;
            }
        }
    }

    let mut col_of_row = vec![0usize; n];
    for col in 1..=n {
        if row_of_col[col] > 0 {
            col_of_row[row_of_col[col] - 1] = col - 1;
        }
    }
    col_of_row
}
