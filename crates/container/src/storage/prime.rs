/// Простые числа для размеров хэш-таблиц (примерно удвоение на каждом шаге)
pub const PRIMES: [usize; 32] = [
    1, 2, 3, 7, 13, 31, 61, 127, 251, 509, 1021, 2039, 4093, 8191, 16381, 32749, 65521, 131071,
    262139, 524287, 1048573, 2097143, 4194301, 8388593, 16777213, 33554393, 67108859, 134217689,
    268435399, 536870909, 1073741789, 2147483647,
];

/// Индекс наименьшего простого `>= required`
///
/// Таблица должна иметь еще одно простое после найденного (для массива метаданных),
/// поэтому последний элемент никогда не возвращается.
pub fn index_for(required: usize) -> usize {
    match PRIMES[..PRIMES.len() - 1].iter().position(|&p| p >= required) {
        Some(index) => index,
        None => panic!("storage capacity exceeded: {} entries requested", required),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_for() {
        assert_eq!(index_for(0), 0);
        assert_eq!(index_for(1), 0);
        assert_eq!(index_for(4), 3);
        assert_eq!(index_for(7), 3);
        assert_eq!(index_for(8), 4);
        assert_eq!(PRIMES[index_for(1000)], 1021);
    }

    #[test]
    fn test_primes_are_increasing() {
        assert!(PRIMES.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    #[should_panic(expected = "storage capacity exceeded")]
    fn test_growth_past_table_panics() {
        index_for(PRIMES[PRIMES.len() - 1]);
    }
}
