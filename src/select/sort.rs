//! Fixed-size bitonic sorting network.

use crate::scalar::RealScalar;

/// Sort `data` ascending in place. The length must be a power of two;
/// callers pad with `+inf` to reach one.
pub fn bitonic_sort<R: RealScalar>(data: &mut [R]) {
    let n = data.len();
    assert!(
        n.is_power_of_two() || n == 0,
        "bitonic network needs a power-of-two length, got {n}"
    );
    let mut k = 2;
    while k <= n {
        let mut j = k / 2;
        while j > 0 {
            for i in 0..n {
                let partner = i ^ j;
                if partner > i {
                    let ascending = i & k == 0;
                    let out_of_order = if ascending {
                        data[i] > data[partner]
                    } else {
                        data[i] < data[partner]
                    };
                    if out_of_order {
                        data.swap(i, partner);
                    }
                }
            }
            j /= 2;
        }
        k *= 2;
    }
}

/// Copy `values` into a power-of-two buffer padded with `+inf` and sort it.
pub fn padded_sort<R: RealScalar>(values: impl ExactSizeIterator<Item = R>) -> Vec<R> {
    let len = values.len().max(1).next_power_of_two();
    let mut buffer: Vec<R> = values.collect();
    buffer.resize(len, R::INFINITY);
    bitonic_sort(&mut buffer);
    buffer
}
