pub mod gaussian_blur;
pub mod laplacian;

/// Mirror an out-of-range index back into `[0, n)` without repeating the edge
/// sample (`dcb|abcd|cba`).
pub(crate) fn reflect_index(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let period = 2 * (n as isize - 1);
    let mut i = i.rem_euclid(period);
    if i >= n as isize {
        i = period - i;
    }
    i as usize
}
